use std::collections::HashMap;
use std::time::Duration;

use log::{debug, error};

use crate::error::{ControlError, ControlResult};
use crate::process::run_shell;
use crate::scheduler::SubmitParams;

const PLUGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// A registry of external hook programs keyed by name.
///
/// Resource plugins translate a resource description into agent
/// submissions; request triggers are fired after requests for auditing.
/// Both run through the shell with a fixed timeout and captured stdout.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, String>,
}

impl PluginRegistry {
    pub fn register(&mut self, name: impl Into<String>, command: impl Into<String>) {
        self.plugins.insert(name.into(), command.into());
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub async fn exec(
        &self,
        name: &str,
        partition_id: &str,
        run_number: u64,
        resources: Option<&str>,
    ) -> ControlResult<String> {
        let Some(command) = self.plugins.get(name) else {
            return Err(ControlError::ResourcePluginFailed(format!(
                "plugin {name:?} is not registered"
            )));
        };
        let mut command = format!("{command} --id {partition_id} --run {run_number}");
        if let Some(resources) = resources {
            command.push_str(&format!(" --resources '{resources}'"));
        }
        let out = run_shell(&command, PLUGIN_TIMEOUT).await?;
        if out.exit_code != 0 {
            return Err(ControlError::ResourcePluginFailed(format!(
                "plugin {name:?} failed with exit code {}; stderr: {:?}",
                out.exit_code, out.stderr
            )));
        }
        Ok(out.stdout)
    }

    /// Run a resource plugin and parse its stdout as a list of agent
    /// submissions.
    pub async fn resource_params(
        &self,
        name: &str,
        resources: &str,
        partition_id: &str,
        run_number: u64,
    ) -> ControlResult<Vec<SubmitParams>> {
        let out = self
            .exec(name, partition_id, run_number, Some(resources))
            .await?;
        let params: Vec<SubmitParams> = serde_yaml::from_str(&out).map_err(|e| {
            ControlError::ResourcePluginFailed(format!(
                "plugin {name:?} produced unparsable submissions: {e}"
            ))
        })?;
        debug!("plugin {name:?} produced {} submissions", params.len());
        Ok(params)
    }

    /// Fire a request trigger. Trigger failures are logged and swallowed;
    /// they never influence the request result.
    pub async fn fire_trigger(&self, name: &str, partition_id: &str, run_number: u64) {
        if !self.is_registered(name) {
            return;
        }
        debug!("executing request trigger {name:?}");
        match self.exec(name, partition_id, run_number, None).await {
            Ok(out) => debug!("request trigger {name:?} done: {}", out.trim_end()),
            Err(e) => error!("request trigger {name:?} failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unregistered_plugin() {
        let registry = PluginRegistry::default();
        assert!(!registry.is_registered("slurm"));
        assert!(registry.exec("slurm", "p1", 0, None).await.is_err());
    }

    #[tokio::test]
    async fn test_resource_params_parsed_from_stdout() {
        let mut registry = PluginRegistry::default();
        // The trailing `#` comments out the arguments the registry appends.
        registry.register(
            "static",
            "echo '- {rms: local, agent_group: online, n_agents: 4, slots_per_agent: 2}' #",
        );
        let params = registry
            .resource_params("static", "--mem 64", "p1", 7)
            .await
            .unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].n_agents, 4);
        assert_eq!(params[0].required_slots(), 8);
    }

    #[tokio::test]
    async fn test_failing_plugin_surfaces_exit_code() {
        let mut registry = PluginRegistry::default();
        registry.register("broken", "exit 2");
        let error = registry
            .resource_params("broken", "", "p1", 0)
            .await
            .unwrap_err();
        assert!(error.to_string().contains("exit code 2"));
    }
}
