use std::path::{Path, PathBuf};

use bosun_core::controller::{RequestResult, StatusResult};
use bosun_core::topology::TopologySource;
use clap::{Args, Parser};

/// Options shared by every partition request command.
#[derive(Debug, Args)]
pub struct CommonOpts {
    /// Partition ID
    #[arg(long = "id", default_value = "")]
    pub partition: String,
    /// Run number
    #[arg(long = "run", default_value_t = 0)]
    pub run: u64,
    /// Request timeout in seconds (0 uses the controller default)
    #[arg(long, default_value_t = 0)]
    pub timeout: u64,
}

impl CommonOpts {
    pub fn to_params(&self) -> bosun_core::controller::CommonParams {
        bosun_core::controller::CommonParams {
            partition_id: self.partition.clone(),
            run_number: self.run,
            timeout_secs: self.timeout,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = ".init", about = "Create a new scheduler session or attach to an existing one")]
pub struct InitOpts {
    #[command(flatten)]
    pub common: CommonOpts,
    /// Scheduler session ID to attach to
    #[arg(long)]
    pub sid: Option<String>,
}

#[derive(Debug, Parser)]
#[command(name = ".submit", about = "Submit agents. Can be called multiple times")]
pub struct SubmitOpts {
    #[command(flatten)]
    pub common: CommonOpts,
    /// Resource plugin name
    #[arg(short, long, default_value = "")]
    pub plugin: String,
    /// Resource description for the plugin
    #[arg(short, long, default_value = "")]
    pub resources: String,
}

#[derive(Debug, Args)]
pub struct TopoOpts {
    /// Topology file path
    #[arg(long)]
    pub topo: Option<PathBuf>,
    /// Topology content
    #[arg(long)]
    pub content: Option<String>,
    /// Script that generates the topology content
    #[arg(long)]
    pub script: Option<String>,
}

impl TopoOpts {
    pub fn to_source(&self) -> TopologySource {
        TopologySource {
            file: self.topo.clone(),
            content: self.content.clone(),
            script: self.script.clone(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = ".activate", about = "Activate the topology (devices enter Idle)")]
pub struct ActivateOpts {
    #[command(flatten)]
    pub common: CommonOpts,
    #[command(flatten)]
    pub topo: TopoOpts,
}

#[derive(Debug, Parser)]
#[command(name = ".run", about = "Initialize, Submit and Activate in one request")]
pub struct RunOpts {
    #[command(flatten)]
    pub common: CommonOpts,
    /// Resource plugin name
    #[arg(short, long, default_value = "")]
    pub plugin: String,
    /// Resource description for the plugin
    #[arg(short, long, default_value = "")]
    pub resources: String,
    #[command(flatten)]
    pub topo: TopoOpts,
    /// Derive the required resources from the topology
    #[arg(long)]
    pub extract_topo_resources: bool,
}

#[derive(Debug, Parser)]
#[command(name = ".update", about = "Update the active topology")]
pub struct UpdateOpts {
    #[command(flatten)]
    pub common: CommonOpts,
    #[command(flatten)]
    pub topo: TopoOpts,
}

#[derive(Debug, Parser)]
#[command(name = ".prop", about = "Set device properties")]
pub struct PropOpts {
    #[command(flatten)]
    pub common: CommonOpts,
    /// Key-value pairs (key:value), repeatable
    #[arg(long = "prop", value_parser = parse_prop, value_name = "KEY:VALUE")]
    pub props: Vec<(String, String)>,
    /// Topology path of the target devices
    #[arg(long, default_value = "")]
    pub path: String,
}

#[derive(Debug, Parser)]
pub struct DeviceOpts {
    #[command(flatten)]
    pub common: CommonOpts,
    /// Topology path of the target devices
    #[arg(long, default_value = "")]
    pub path: String,
    /// Include the detailed per-task state in the reply
    #[arg(long)]
    pub detailed: bool,
}

impl DeviceOpts {
    pub fn to_request(&self) -> bosun_core::controller::DeviceRequest {
        bosun_core::controller::DeviceRequest {
            common: self.common.to_params(),
            path: self.path.clone(),
            detailed: self.detailed,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = ".down", about = "Shut down the scheduler session")]
pub struct ShutdownOpts {
    #[command(flatten)]
    pub common: CommonOpts,
}

#[derive(Debug, Parser)]
#[command(name = ".status", about = "Show the status of managed partitions")]
pub struct StatusOpts {
    /// Select only running sessions
    #[arg(long)]
    pub running: bool,
}

#[derive(Debug, Parser)]
#[command(name = ".batch", about = "Execute a list of commands")]
pub struct BatchOpts {
    /// Commands to execute
    #[arg(long, num_args = 1.., value_name = "CMD")]
    pub cmds: Vec<String>,
    /// File containing commands, one per line
    #[arg(long, value_name = "PATH")]
    pub cf: Option<PathBuf>,
}

#[derive(Debug, Parser)]
#[command(name = ".sleep", about = "Sleep for the given number of milliseconds")]
pub struct SleepOpts {
    /// Sleep time in ms
    #[arg(long, default_value_t = 1000)]
    pub ms: u64,
}

fn parse_prop(value: &str) -> Result<(String, String), String> {
    match value.split_once(':') {
        Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
        _ => Err(format!("wrong property format for {value:?}, use key:value")),
    }
}

/// Split a command line into arguments, honoring single and double quotes.
pub fn split_args(line: &str) -> Vec<String> {
    let mut out = vec![];
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    for c in line.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        out.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                c => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }
    if in_word {
        out.push(current);
    }
    out
}

/// Read a batch command file: one command per line, empty lines skipped.
pub fn read_command_file(path: &Path) -> Result<Vec<String>, std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

pub fn format_result(result: &RequestResult) -> String {
    let mut lines = vec![format!(
        "  status: {}, message: {:?}, exec time: {} ms",
        if result.is_ok() { "OK" } else { "ERROR" },
        result.message,
        result.exec_time_ms
    )];
    if let Some(error) = &result.error {
        lines.push(format!(
            "  error: {} ({}): {}",
            error.code, error.code as u32, error.details
        ));
    }
    lines.push(format!(
        "  partition: {:?}, run: {}, session: {}",
        result.partition_id,
        result.run_number,
        result
            .session_id
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string())
    ));
    lines.push(format!(
        "  aggregated state: {}",
        result.topology_state.aggregated
    ));
    if !result.hosts.is_empty() {
        lines.push(format!("  hosts: {}", result.hosts.join(", ")));
    }
    if let Some(detailed) = &result.topology_state.detailed {
        lines.push(format!("  devices ({}):", detailed.len()));
        for task in detailed {
            lines.push(format!(
                "    task: {}, state: {}, path: {}, host: {}{}",
                task.task_id,
                task.state,
                task.path,
                task.host,
                if task.expendable { ", expendable" } else { "" }
            ));
        }
    }
    lines.join("\n")
}

pub fn format_status(result: &StatusResult) -> String {
    let mut lines = vec![format!(
        "  status: OK, message: {:?}, exec time: {} ms",
        result.message, result.exec_time_ms
    )];
    lines.push(format!("  partitions ({}):", result.partitions.len()));
    for partition in &result.partitions {
        lines.push(format!(
            "    id: {:?}, session: {}, session status: {}, state: {}",
            partition.partition_id,
            partition
                .session_id
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            partition.session_status,
            partition.aggregated_state
        ));
    }
    lines.join("\n")
}

pub const HELP: &str = "\
Available commands:

.init - Initialize. Creates a new scheduler session or attaches to an existing one.
.submit - Submit agents. Can be called multiple times.
.activate - Activate the topology (devices enter Idle state).
.run - Combines Initialize, Submit and Activate. A new session is always created.
.prop - Set device properties.
.update - Update the active topology.
.state - Get the current aggregated state of devices.
.config - Transition devices to Ready (InitDevice->CompleteInit->Bind->Connect->InitTask).
.start - Transition devices to Running (via Run).
.stop - Transition devices to Ready (via Stop).
.reset - Transition devices to Idle (via ResetTask->ResetDevice).
.term - Shut devices down via the End transition.
.down - Shut down the scheduler session.
.status - Show the status of managed partitions.
.batch - Execute a list of commands.
.sleep - Sleep for X ms.
.help - List the available commands.
.quit - Quit the program.

View command options with \"<command> --help\".";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_args() {
        assert_eq!(
            split_args(".init --id physics_1 --run 3"),
            vec![".init", "--id", "physics_1", "--run", "3"]
        );
        assert_eq!(
            split_args(".prop --prop 'key:some value'"),
            vec![".prop", "--prop", "key:some value"]
        );
        assert_eq!(
            split_args("  .state   --path \"main/Samplers\"  "),
            vec![".state", "--path", "main/Samplers"]
        );
        assert!(split_args("   ").is_empty());
        assert_eq!(split_args("a''b"), vec!["ab"]);
    }

    #[test]
    fn test_parse_prop() {
        assert_eq!(
            parse_prop("key:value").unwrap(),
            ("key".to_string(), "value".to_string())
        );
        assert_eq!(
            parse_prop("key:a:b").unwrap(),
            ("key".to_string(), "a:b".to_string())
        );
        assert!(parse_prop("novalue").is_err());
        assert!(parse_prop(":value").is_err());
    }

    #[test]
    fn test_device_opts_parsing() {
        let opts = DeviceOpts::try_parse_from([
            ".config",
            "--id",
            "p1",
            "--timeout",
            "5",
            "--path",
            "main/Samplers",
            "--detailed",
        ])
        .unwrap();
        assert_eq!(opts.common.partition, "p1");
        assert_eq!(opts.common.timeout, 5);
        assert_eq!(opts.path, "main/Samplers");
        assert!(opts.detailed);
    }

    #[test]
    fn test_batch_opts_reject_nothing() {
        let opts = BatchOpts::try_parse_from([".batch", "--cmds", ".status", ".sleep --ms 1"])
            .unwrap();
        assert_eq!(opts.cmds.len(), 2);
        assert!(opts.cf.is_none());
    }
}
