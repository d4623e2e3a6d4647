//! Partkeeper command line control tool.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{self, LevelFilter};
use partkeeper::{
    build_chain, logger_init, pf_error, KeeperError, MemStore,
    PartitionedImage, ReplicaChunkSet, ReplicationMode, Task,
};
use serde::Deserialize;
use tokio::runtime::Builder;

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    #[command(subcommand)]
    command: CliCommand,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 2)]
    threads: usize,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Print the task chain a planner would post for an inventory.
    Plan {
        /// Name of replication mode to plan with.
        #[arg(short, long)]
        mode: String,

        /// Minimum number of copies every chunk should have.
        #[arg(short = 'n', long, default_value_t = 2)]
        min_replicas: usize,

        /// TOML file listing `[[entries]]` of `replica` and `chunks`.
        #[arg(short, long)]
        inventory: PathBuf,
    },

    /// Print every slot's version and the current slot of an image.
    Slots {
        /// Image config TOML string.
        #[arg(short, long)]
        config: Option<String>,
    },
}

/// Sanitized action to perform.
#[derive(Debug, PartialEq)]
enum CtlAction {
    Plan {
        mode: ReplicationMode,
        min_replicas: usize,
        inventory: PathBuf,
    },
    Slots {
        config: Option<String>,
    },
}

/// Inventory file layout.
#[derive(Debug, Deserialize)]
struct InventoryFile {
    entries: Vec<ReplicaChunkSet>,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(action)` on success or
    /// `Err(KeeperError)` on any error.
    fn sanitize(&self) -> Result<CtlAction, KeeperError> {
        if self.threads < 1 {
            return Err(KeeperError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )));
        }

        match &self.command {
            CliCommand::Plan {
                mode,
                min_replicas,
                inventory,
            } => {
                if *min_replicas == 0 {
                    return Err(KeeperError::msg(format!(
                        "invalid min_replicas {}",
                        min_replicas
                    )));
                }
                let mode = ReplicationMode::parse_name(mode).ok_or(
                    KeeperError::msg(format!("mode name '{}' unrecognized", mode)),
                )?;
                Ok(CtlAction::Plan {
                    mode,
                    min_replicas: *min_replicas,
                    inventory: inventory.clone(),
                })
            }
            CliCommand::Slots { config } => Ok(CtlAction::Slots {
                config: config.clone(),
            }),
        }
    }
}

/// Plans over the inventory file and prints the resulting chain.
fn print_plan(
    mode: ReplicationMode,
    min_replicas: usize,
    inventory: &Path,
) -> Result<(), KeeperError> {
    let content = fs::read_to_string(inventory)?;
    let file: InventoryFile = toml::from_str(&content)?;

    let plan = mode.new_planner().plan(min_replicas, &file.entries)?;
    let chain = match build_chain(plan) {
        Some(chain) => chain,
        None => {
            println!("nothing to do");
            return Ok(());
        }
    };

    println!("{}", Task::Chained(chain.clone()));
    for (i, stage) in chain.stages().iter().enumerate() {
        println!("stage {}: {}", i, stage);
        if let Task::Grouped(group) = stage {
            for member in group.members() {
                println!("  {}", member);
            }
        }
    }
    Ok(())
}

/// Prints slot versions of a file-backed image.
async fn print_slots(config: Option<&str>) -> Result<(), KeeperError> {
    let image =
        PartitionedImage::new_file_backed(config, Arc::new(MemStore::new()))
            .await?;
    let versions = image.slot_versions().await?;
    let current = image.calculate_current_slot().await?;

    for (slot, version) in versions.iter().enumerate() {
        let mark = if slot == current { "*" } else { " " };
        let handle = image.slot_handle(slot).unwrap_or_default();
        match version {
            Some(version) => {
                println!("{} slot {} '{}': version {}", mark, slot, handle, version)
            }
            None => println!("{} slot {} '{}': empty", mark, slot, handle),
        }
    }
    Ok(())
}

/// Actual main function of Partkeeper control tool.
fn ctl_main() -> Result<(), KeeperError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    let action = args.sanitize()?;

    let log_level = log::max_level();
    {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name("tokio-worker-ctl")
            .build()?;

        runtime.block_on(async move {
            match action {
                CtlAction::Plan {
                    mode,
                    min_replicas,
                    inventory,
                } => print_plan(mode, min_replicas, &inventory)?,
                CtlAction::Slots { config } => {
                    print_slots(config.as_deref()).await?
                }
            }

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<(), KeeperError>(()) // give type hint for this async closure
        })?;
    } // drop the runtime here

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of Partkeeper control tool.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = ctl_main() {
        pf_error!("ctl_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
