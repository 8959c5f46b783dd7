use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::target::TargetSpec;

#[derive(Parser, Debug)]
#[command(
    name = "quickvm",
    version,
    about = "Quick Hyper-V virtual machine management from the command line"
)]
pub struct Cli {
    /// Path to config file (default: <config dir>/quickvm/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,

    /// Per-command shell timeout in seconds (0 disables; overrides config)
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Answer yes to confirmation prompts
    #[arg(short, long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable tables
    Table,
    /// `{success, data | error}` JSON on stdout
    Json,
}

/// Which VMs a lifecycle command applies to.
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// VM indices as shown by `quickvm list`
    #[arg(allow_negative_numbers = true)]
    pub indices: Vec<String>,

    /// Index ranges, e.g. 1-3,5,7-9
    #[arg(short, long)]
    pub range: Option<String>,

    /// Every VM
    #[arg(short, long)]
    pub all: bool,
}

impl TargetArgs {
    pub fn spec(&self) -> TargetSpec<'_> {
        TargetSpec {
            indices: &self.indices,
            range: self.range.as_deref(),
            all: self.all,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List all VMs with their indices
    #[command(alias = "ls")]
    List,

    /// Start VMs
    Start(TargetArgs),

    /// Stop VMs (forced)
    Stop(TargetArgs),

    /// Restart VMs (forced)
    Restart(TargetArgs),

    /// Host CPU, memory, disks and Hyper-V status
    Info,

    /// Manage VM snapshots (checkpoints)
    Snapshot {
        #[command(subcommand)]
        action: SnapshotCommand,
    },

    /// Clone a VM through export and import
    Clone {
        /// Index of the source VM
        vm: String,
        /// Name for the copy
        new_name: String,
    },

    /// Export a VM to a directory
    Export {
        /// VM index
        vm: String,
        /// Destination directory
        path: PathBuf,
    },

    /// Import a VM from an export directory or .vmcx file
    Import {
        path: PathBuf,

        /// Copy the VM files instead of registering them in place
        #[arg(long)]
        copy: bool,

        /// Give the imported VM a new unique id
        #[arg(long)]
        generate_new_id: bool,

        /// Where copied virtual disks go
        #[arg(long, value_name = "DIR")]
        vhd_destination: Option<PathBuf>,
    },

    /// GPU partitioning (GPU-P)
    Gpu {
        #[command(subcommand)]
        action: GpuCommand,
    },

    /// Open a Remote Desktop session to a running VM
    Rdp {
        /// VM index
        vm: String,

        /// `user` or `user@password`; a password is stored with cmdkey
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Manage named groups of VMs
    #[command(alias = "ws")]
    Workspace {
        #[command(subcommand)]
        action: WorkspaceCommand,
    },

    /// Enable the Hyper-V feature (requires Administrator)
    Enable {
        /// Do not offer to restart afterwards
        #[arg(long)]
        no_restart: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum SnapshotCommand {
    /// List snapshots of a VM
    #[command(alias = "ls")]
    List {
        /// VM index
        vm: String,
    },
    /// Create a snapshot
    Create {
        /// VM index
        vm: String,
        /// Snapshot name
        name: String,
    },
    /// Revert a VM to a snapshot
    Restore {
        /// VM index
        vm: String,
        /// Snapshot name
        name: String,
    },
    /// Delete a snapshot
    Delete {
        /// VM index
        vm: String,
        /// Snapshot name
        name: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum GpuCommand {
    /// Partitionable host GPUs, or whether one VM has a partition
    Status {
        /// VM index
        vm: Option<String>,
    },
    /// Attach a GPU partition to a stopped VM
    Add {
        /// VM index
        vm: String,
    },
    /// Detach the GPU partition from a stopped VM
    Remove {
        /// VM index
        vm: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum WorkspaceCommand {
    /// List workspaces
    #[command(alias = "ls")]
    List,
    /// Create or overwrite a workspace
    Create {
        name: String,
        /// Comma-separated VM names
        #[arg(long, required = true)]
        vms: String,
        #[arg(short, long, default_value = "Created via CLI")]
        description: String,
    },
    /// Show a workspace
    Show { name: String },
    /// Delete a workspace
    Delete { name: String },
    /// Start every VM in a workspace
    Start { name: String },
    /// Stop every VM in a workspace
    Stop { name: String },
}

impl Command {
    /// Commands that change host state get a file log.
    pub fn mutates(&self) -> bool {
        match self {
            Command::List | Command::Info => false,
            Command::Snapshot { action } => !matches!(action, SnapshotCommand::List { .. }),
            Command::Gpu { action } => !matches!(action, GpuCommand::Status { .. }),
            Command::Workspace { action } => !matches!(
                action,
                WorkspaceCommand::List | WorkspaceCommand::Show { .. }
            ),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("quickvm").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn target_args_combine() {
        let cli = parse(&["stop", "2", "5", "-r", "7-9"]);
        let Command::Stop(args) = cli.command else {
            panic!("expected stop");
        };
        let spec = args.spec();
        assert_eq!(spec.indices, ["2", "5"]);
        assert_eq!(spec.range, Some("7-9"));
        assert!(!spec.all);
    }

    #[test]
    fn negative_index_reaches_resolution() {
        let cli = parse(&["start", "-1"]);
        let Command::Start(args) = cli.command else {
            panic!("expected start");
        };
        assert_eq!(args.indices, ["-1"]);
    }

    #[test]
    fn globals_after_subcommand() {
        let cli = parse(&["ls", "--output", "json", "-y", "--timeout", "0"]);
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(cli.yes);
        assert_eq!(cli.timeout, Some(0));
        assert!(!cli.command.mutates());
    }

    #[test]
    fn workspace_alias_and_create() {
        let cli = parse(&["ws", "create", "lab", "--vms", "web,db"]);
        match cli.command {
            Command::Workspace {
                action: WorkspaceCommand::Create { name, vms, description },
            } => {
                assert_eq!(name, "lab");
                assert_eq!(vms, "web,db");
                assert_eq!(description, "Created via CLI");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn read_only_commands_do_not_mutate() {
        assert!(!parse(&["snapshot", "list", "1"]).command.mutates());
        assert!(!parse(&["gpu", "status"]).command.mutates());
        assert!(parse(&["gpu", "add", "1"]).command.mutates());
        assert!(parse(&["restart", "-a"]).command.mutates());
    }
}
