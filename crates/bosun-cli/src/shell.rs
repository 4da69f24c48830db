use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bosun_core::controller::{
    ActivateRequest, InitializeRequest, PartitionController, RunRequest, SetPropertiesRequest,
    ShutdownRequest, StatusRequest, SubmitRequest, UpdateRequest,
};
use clap::Parser;
use log::warn;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::commands::{
    self, ActivateOpts, BatchOpts, DeviceOpts, InitOpts, PropOpts, RunOpts, ShutdownOpts,
    SleepOpts, StatusOpts, SubmitOpts, UpdateOpts,
};

const HISTORY_FILE: &str = ".bosun_history";

enum Flow {
    Continue,
    Quit,
}

/// The interactive control shell: dot-prefixed commands over an embedded
/// partition controller.
pub struct Shell {
    controller: Arc<PartitionController>,
}

impl Shell {
    pub fn new(controller: Arc<PartitionController>) -> Self {
        Self { controller }
    }

    pub async fn run_interactive(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        println!("bosun control shell. Use \".help\" to list available commands.");
        let mut editor = DefaultEditor::new()?;
        let history = history_path();
        if let Some(path) = &history {
            let _ = editor.load_history(path);
        }
        loop {
            match editor.readline(">> ") {
                Ok(line) => {
                    let line = line.trim_end();
                    if line.is_empty() {
                        continue;
                    }
                    let _ = editor.add_history_entry(line);
                    if let Flow::Quit = self.execute(vec![line.to_string()]).await {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        }
        if let Some(path) = &history {
            let _ = editor.save_history(path);
        }
        Ok(())
    }

    /// Execute the given commands in order, then return.
    pub async fn run_batch(&self, cmds: Vec<String>) {
        self.execute(cmds).await;
    }

    async fn execute(&self, initial: Vec<String>) -> Flow {
        let mut queue: VecDeque<String> = initial.into();
        while let Some(line) = queue.pop_front() {
            let args = commands::split_args(&line);
            let Some(cmd) = args.first() else {
                continue;
            };
            if cmd == ".quit" {
                return Flow::Quit;
            }
            println!("executing command {line:?}");
            let reply = match cmd.as_str() {
                ".help" => {
                    println!("{}", commands::HELP);
                    None
                }
                ".sleep" => {
                    if let Some(opts) = parse::<SleepOpts>(&args) {
                        if opts.ms > 0 {
                            println!("sleeping {} ms", opts.ms);
                            tokio::time::sleep(Duration::from_millis(opts.ms)).await;
                        }
                    }
                    None
                }
                ".batch" => {
                    if let Some(opts) = parse::<BatchOpts>(&args) {
                        match resolve_batch(&opts) {
                            Ok(cmds) => {
                                for (index, cmd) in cmds.into_iter().enumerate() {
                                    queue.insert(index, cmd);
                                }
                            }
                            Err(e) => println!("error: {e}"),
                        }
                    }
                    None
                }
                ".init" => match parse::<InitOpts>(&args) {
                    Some(opts) => {
                        let session_id = match opts.sid.as_deref().map(str::parse) {
                            Some(Err(e)) => {
                                println!("error: {e}");
                                continue;
                            }
                            Some(Ok(sid)) => Some(sid),
                            None => None,
                        };
                        let request = InitializeRequest {
                            common: opts.common.to_params(),
                            session_id,
                        };
                        Some(commands::format_result(
                            &self.controller.initialize(request).await,
                        ))
                    }
                    None => None,
                },
                ".submit" => match parse::<SubmitOpts>(&args) {
                    Some(opts) => {
                        let request = SubmitRequest {
                            common: opts.common.to_params(),
                            plugin: opts.plugin,
                            resources: opts.resources,
                        };
                        Some(commands::format_result(
                            &self.controller.submit(request).await,
                        ))
                    }
                    None => None,
                },
                ".activate" => match parse::<ActivateOpts>(&args) {
                    Some(opts) => {
                        let request = ActivateRequest {
                            common: opts.common.to_params(),
                            topology: opts.topo.to_source(),
                        };
                        Some(commands::format_result(
                            &self.controller.activate(request).await,
                        ))
                    }
                    None => None,
                },
                ".run" => match parse::<RunOpts>(&args) {
                    Some(opts) => {
                        let request = RunRequest {
                            common: opts.common.to_params(),
                            session_id: None,
                            plugin: opts.plugin,
                            resources: opts.resources,
                            topology: opts.topo.to_source(),
                            extract_topo_resources: opts.extract_topo_resources,
                        };
                        Some(commands::format_result(&self.controller.run(request).await))
                    }
                    None => None,
                },
                ".update" => match parse::<UpdateOpts>(&args) {
                    Some(opts) => {
                        let request = UpdateRequest {
                            common: opts.common.to_params(),
                            topology: opts.topo.to_source(),
                        };
                        Some(commands::format_result(
                            &self.controller.update(request).await,
                        ))
                    }
                    None => None,
                },
                ".prop" => match parse::<PropOpts>(&args) {
                    Some(opts) => {
                        let request = SetPropertiesRequest {
                            common: opts.common.to_params(),
                            path: opts.path,
                            properties: opts.props,
                        };
                        Some(commands::format_result(
                            &self.controller.set_properties(request).await,
                        ))
                    }
                    None => None,
                },
                ".state" => match parse::<DeviceOpts>(&args) {
                    Some(opts) => Some(commands::format_result(
                        &self.controller.get_state(opts.to_request()).await,
                    )),
                    None => None,
                },
                ".config" => match parse::<DeviceOpts>(&args) {
                    Some(opts) => Some(commands::format_result(
                        &self.controller.configure(opts.to_request()).await,
                    )),
                    None => None,
                },
                ".start" => match parse::<DeviceOpts>(&args) {
                    Some(opts) => Some(commands::format_result(
                        &self.controller.start(opts.to_request()).await,
                    )),
                    None => None,
                },
                ".stop" => match parse::<DeviceOpts>(&args) {
                    Some(opts) => Some(commands::format_result(
                        &self.controller.stop(opts.to_request()).await,
                    )),
                    None => None,
                },
                ".reset" => match parse::<DeviceOpts>(&args) {
                    Some(opts) => Some(commands::format_result(
                        &self.controller.reset(opts.to_request()).await,
                    )),
                    None => None,
                },
                ".term" => match parse::<DeviceOpts>(&args) {
                    Some(opts) => Some(commands::format_result(
                        &self.controller.terminate(opts.to_request()).await,
                    )),
                    None => None,
                },
                ".down" => match parse::<ShutdownOpts>(&args) {
                    Some(opts) => {
                        let request = ShutdownRequest {
                            common: opts.common.to_params(),
                        };
                        Some(commands::format_result(
                            &self.controller.shutdown(request).await,
                        ))
                    }
                    None => None,
                },
                ".status" => match parse::<StatusOpts>(&args) {
                    Some(opts) => {
                        let request = StatusRequest {
                            running_only: opts.running,
                        };
                        Some(commands::format_status(
                            &self.controller.status(request).await,
                        ))
                    }
                    None => None,
                },
                other => {
                    warn!("unknown command {other:?}");
                    println!("unknown command {other:?}");
                    None
                }
            };
            if let Some(reply) = reply {
                println!("reply:\n{reply}");
            }
        }
        Flow::Continue
    }
}

fn history_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(HISTORY_FILE))
}

fn parse<T: Parser>(args: &[String]) -> Option<T> {
    match T::try_parse_from(args) {
        Ok(opts) => Some(opts),
        Err(e) => {
            println!("{e}");
            None
        }
    }
}

fn resolve_batch(opts: &BatchOpts) -> Result<Vec<String>, String> {
    match (&opts.cmds, &opts.cf) {
        (cmds, None) if !cmds.is_empty() => Ok(cmds.clone()),
        (cmds, Some(path)) if cmds.is_empty() => {
            commands::read_command_file(path).map_err(|e| e.to_string())
        }
        _ => Err("either --cmds or --cf has to be set, not both".to_string()),
    }
}
