use tonic::Status;

use crate::controller::{
    CommonParams, PartitionStatus, RequestResult, RequestStatus, StatusResult,
};
use crate::id::SessionId;
use crate::rpc::gen;
use crate::topology::TopologySource;

pub(super) fn common_params(common: Option<gen::Common>) -> CommonParams {
    let common = common.unwrap_or_default();
    CommonParams {
        partition_id: common.partition_id,
        run_number: common.run_number,
        timeout_secs: common.timeout,
    }
}

pub(super) fn session_id(value: &str) -> Result<Option<SessionId>, Status> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<SessionId>()
        .map(Some)
        .map_err(|e| Status::invalid_argument(e.to_string()))
}

pub(super) fn topology_source(source: Option<gen::TopologySource>) -> TopologySource {
    let source = source.unwrap_or_default();
    TopologySource {
        file: (!source.file.is_empty()).then(|| source.file.into()),
        content: (!source.content.is_empty()).then_some(source.content),
        script: (!source.script.is_empty()).then_some(source.script),
    }
}

pub(super) fn general_reply(result: RequestResult) -> gen::GeneralReply {
    gen::GeneralReply {
        status: reply_status(result.status) as i32,
        message: result.message,
        exec_time_ms: result.exec_time_ms,
        error: result.error.map(|e| gen::Error {
            code: e.code as u32,
            details: e.details,
        }),
        partition_id: result.partition_id,
        run_number: result.run_number,
        session_id: result
            .session_id
            .map(|s| s.to_string())
            .unwrap_or_default(),
        topology_state: Some(gen::TopologyState {
            aggregated: result.topology_state.aggregated.to_string(),
            detailed: result
                .topology_state
                .detailed
                .unwrap_or_default()
                .into_iter()
                .map(|d| gen::TaskDetail {
                    task_id: d.task_id.into(),
                    state: d.state.to_string(),
                    ignored: d.ignored,
                    expendable: d.expendable,
                    host: d.host,
                    path: d.path,
                })
                .collect(),
        }),
        hosts: result.hosts,
    }
}

pub(super) fn status_reply(result: StatusResult) -> gen::StatusReply {
    gen::StatusReply {
        status: reply_status(result.status) as i32,
        message: result.message,
        exec_time_ms: result.exec_time_ms,
        partitions: result.partitions.into_iter().map(partition_status).collect(),
    }
}

fn partition_status(status: PartitionStatus) -> gen::PartitionStatus {
    gen::PartitionStatus {
        partition_id: status.partition_id,
        session_id: status
            .session_id
            .map(|s| s.to_string())
            .unwrap_or_default(),
        session_status: status.session_status.to_string(),
        aggregated_state: status.aggregated_state.to_string(),
    }
}

fn reply_status(status: RequestStatus) -> gen::ReplyStatus {
    match status {
        RequestStatus::Ok => gen::ReplyStatus::Ok,
        RequestStatus::Error => gen::ReplyStatus::Error,
    }
}
