use std::io::IsTerminal;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use quickvm::batch::{self, Operation};
use quickvm::cli::{
    Cli, Command, GpuCommand, OutputFormat, SnapshotCommand, TargetArgs, WorkspaceCommand,
};
use quickvm::config::{self, Config};
use quickvm::directory::{Inventory, Vm};
use quickvm::error::QuickVmError;
use quickvm::exec::{PowerShell, ShellExecutor};
use quickvm::hyperv::Manager;
use quickvm::hyperv::rdp::Credentials;
use quickvm::hyperv::transfer::ImportOptions;
use quickvm::logging::{self, DeferredFileHandle};
use quickvm::paths;
use quickvm::progress::{BatchProgress, OutputMode, Task};
use quickvm::report::{self, Message};
use quickvm::target::{self, TargetSet, TargetSpec};
use quickvm::workspace::{self, Workspace};

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let format = cli.output;
    let mode = resolve_output_mode(format);
    let file_handle = logging::init(mode, cli.verbose);

    let result = run(cli, mode, &file_handle).await;
    if let Err(e) = &result {
        tracing::debug!(error = %e, "command failed");
        // A batch report is already on stdout; one JSON document per run.
        if format == OutputFormat::Json && !e.already_reported() {
            println!("{}", report::error_json(e));
        }
    }
    result.map_err(Into::into)
}

/// Spinners only when a human is watching stderr and stdout is a table.
fn resolve_output_mode(format: OutputFormat) -> OutputMode {
    match format {
        OutputFormat::Json => OutputMode::Silent,
        OutputFormat::Table if std::io::stderr().is_terminal() => OutputMode::Normal,
        OutputFormat::Table => OutputMode::Plain,
    }
}

/// Everything a command handler needs besides its own arguments.
struct Context {
    format: OutputFormat,
    mode: OutputMode,
    yes: bool,
    config: Config,
    cancel: CancellationToken,
}

async fn run(cli: Cli, mode: OutputMode, file_handle: &DeferredFileHandle) -> Result<(), QuickVmError> {
    let config = config::load(cli.config.as_deref())?;

    if cli.command.mutates() {
        let path = paths::log_file();
        if let Err(e) = file_handle.set_file(&path) {
            tracing::debug!(path = %path.display(), error = %e, "file logging unavailable");
        }
    }

    // Commands that never touch the shell.
    if let Command::Workspace { action } = &cli.command {
        let handled = workspace_local(action, cli.output)?;
        if handled {
            return Ok(());
        }
    }

    let timeout = match cli.timeout {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => config.shell.timeout(),
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    let shell = PowerShell::new(config.shell.program.clone())
        .with_timeout(timeout)
        .with_cancellation(cancel.clone());
    let mgr = Manager::new(shell);

    let ctx = Context {
        format: cli.output,
        mode,
        yes: cli.yes,
        config,
        cancel,
    };

    dispatch(&mgr, &ctx, cli.command).await
}

async fn dispatch<E: ShellExecutor>(
    mgr: &Manager<E>,
    ctx: &Context,
    command: Command,
) -> Result<(), QuickVmError> {
    match command {
        Command::List => {
            let inventory = mgr.vms().await?;
            report::emit(ctx.format, &report::vm_rows(&inventory))
        }
        Command::Start(args) => lifecycle(mgr, ctx, Operation::START, &args).await,
        Command::Stop(args) => lifecycle(mgr, ctx, Operation::STOP, &args).await,
        Command::Restart(args) => lifecycle(mgr, ctx, Operation::RESTART, &args).await,
        Command::Info => {
            let task = Task::start(ctx.mode, "Gathering system information");
            let info = mgr.system_info().await?;
            task.finish("System information gathered");
            report::emit(ctx.format, &report::SystemReport::from(&info))
        }
        Command::Snapshot { action } => snapshot(mgr, ctx, action).await,
        Command::Clone { vm, new_name } => {
            let inventory = mgr.vms().await?;
            let source = single(&inventory, &vm)?;
            let task = Task::start(ctx.mode, format!("Cloning {} to {new_name}", source.name));
            let cloned = mgr.clone_vm(&inventory, &source.name, &new_name).await?;
            task.finish(format!("Cloned {} to {}", source.name, cloned.name));
            report::emit(ctx.format, &cloned)
        }
        Command::Export { vm, path } => {
            let inventory = mgr.vms().await?;
            let vm = single(&inventory, &vm)?;
            let task = Task::start(ctx.mode, format!("Exporting {}", vm.name));
            mgr.export_vm(&vm.name, &path).await?;
            task.finish(format!("Exported {}", vm.name));
            report::emit(
                ctx.format,
                &Message::new(format!(
                    "VM '{}' exported to {}",
                    vm.name,
                    path.join(&vm.name).display()
                )),
            )
        }
        Command::Import {
            path,
            copy,
            generate_new_id,
            vhd_destination,
        } => {
            let options = ImportOptions {
                path,
                copy,
                generate_new_id,
                vhd_destination,
            };
            let task = Task::start(ctx.mode, format!("Importing {}", options.path.display()));
            let imported = mgr.import_vm(&options).await?;
            task.finish(format!("Imported {}", imported.name));
            report::emit(ctx.format, &imported)
        }
        Command::Gpu { action } => gpu(mgr, ctx, action).await,
        Command::Rdp { vm, user } => {
            let inventory = mgr.vms().await?;
            let vm = single(&inventory, &vm)?;
            let ip = mgr.vm_ipv4(&vm.name).await?;
            let credentials = user.as_deref().and_then(Credentials::parse);
            mgr.connect_rdp(&ip, credentials.as_ref()).await?;
            report::emit(
                ctx.format,
                &Message::new(format!("Remote Desktop launched for '{}' at {ip}", vm.name)),
            )
        }
        Command::Workspace { action } => workspace_batch(mgr, ctx, action).await,
        Command::Enable { no_restart } => enable(mgr, ctx, no_restart).await,
    }
}

/// Resolve one index argument against `inventory`.
fn single<'a>(inventory: &'a Inventory, index: &str) -> Result<&'a Vm, QuickVmError> {
    let indices = [index.to_string()];
    let targets = target::resolve(
        &TargetSpec {
            indices: &indices,
            range: None,
            all: false,
        },
        inventory.bound(),
    )?;
    let first = targets.iter().next().ok_or(QuickVmError::NoTargetsSpecified)?;
    inventory.vm(first)
}

fn confirm(ctx: &Context, message: &str) -> Result<bool, QuickVmError> {
    if ctx.yes {
        return Ok(true);
    }
    inquire::Confirm::new(message)
        .with_default(false)
        .prompt()
        .map_err(|e| QuickVmError::Prompt {
            message: e.to_string(),
        })
}

// ── batch lifecycle ──────────────────────────────────────

async fn run_and_report<E: ShellExecutor>(
    mgr: &Manager<E>,
    ctx: &Context,
    operation: Operation,
    inventory: &Inventory,
    targets: &TargetSet,
    unresolved: &[String],
) -> Result<(), QuickVmError> {
    let mut progress = BatchProgress::new(operation, ctx.mode);
    let mut result = batch::run_batch(
        operation,
        inventory,
        targets,
        &ctx.cancel,
        &mut progress,
        |vm| mgr.apply(operation, &vm.name),
    )
    .await;
    for name in unresolved {
        result.record_unresolved(name);
    }
    report::emit(ctx.format, &report::BatchReport::from(&result))?;
    result.into_status()
}

async fn lifecycle<E: ShellExecutor>(
    mgr: &Manager<E>,
    ctx: &Context,
    operation: Operation,
    args: &TargetArgs,
) -> Result<(), QuickVmError> {
    let spec = args.spec();
    // Nothing requested: fail before the shell runs at all.
    if spec.is_empty() {
        return Err(QuickVmError::NoTargetsSpecified);
    }
    let inventory = mgr.vms().await?;
    let targets = target::resolve(&spec, inventory.bound())?;
    run_and_report(mgr, ctx, operation, &inventory, &targets, &[]).await
}

// ── snapshots ────────────────────────────────────────────

async fn snapshot<E: ShellExecutor>(
    mgr: &Manager<E>,
    ctx: &Context,
    action: SnapshotCommand,
) -> Result<(), QuickVmError> {
    let inventory = mgr.vms().await?;
    match action {
        SnapshotCommand::List { vm } => {
            let vm = single(&inventory, &vm)?;
            let rows: Vec<report::SnapshotRow> = mgr
                .snapshots(&vm.name)
                .await?
                .iter()
                .map(report::SnapshotRow::from)
                .collect();
            report::emit(ctx.format, &rows)
        }
        SnapshotCommand::Create { vm, name } => {
            let vm = single(&inventory, &vm)?;
            mgr.create_snapshot(&vm.name, &name).await?;
            report::emit(
                ctx.format,
                &Message::new(format!("Snapshot '{name}' created for VM '{}'", vm.name)),
            )
        }
        SnapshotCommand::Restore { vm, name } => {
            let vm = single(&inventory, &vm)?;
            if !confirm(
                ctx,
                &format!("Restore VM '{}' to snapshot '{name}'? Current state will be lost.", vm.name),
            )? {
                return report::emit(ctx.format, &Message::new("Restore cancelled"));
            }
            mgr.restore_snapshot(&vm.name, &name).await?;
            report::emit(
                ctx.format,
                &Message::new(format!("VM '{}' restored to snapshot '{name}'", vm.name)),
            )
        }
        SnapshotCommand::Delete { vm, name } => {
            let vm = single(&inventory, &vm)?;
            if !confirm(ctx, &format!("Delete snapshot '{name}' of VM '{}'?", vm.name))? {
                return report::emit(ctx.format, &Message::new("Delete cancelled"));
            }
            mgr.delete_snapshot(&vm.name, &name).await?;
            report::emit(
                ctx.format,
                &Message::new(format!("Snapshot '{name}' deleted from VM '{}'", vm.name)),
            )
        }
    }
}

// ── GPU ──────────────────────────────────────────────────

async fn gpu<E: ShellExecutor>(
    mgr: &Manager<E>,
    ctx: &Context,
    action: GpuCommand,
) -> Result<(), QuickVmError> {
    match action {
        GpuCommand::Status { vm: None } => {
            report::emit(ctx.format, &mgr.partitionable_gpus().await?)
        }
        GpuCommand::Status { vm: Some(vm) } => {
            let inventory = mgr.vms().await?;
            let vm = single(&inventory, &vm)?;
            let has_partition = mgr.has_gpu_adapter(&vm.name).await?;
            report::emit(
                ctx.format,
                &report::GpuAdapterStatus {
                    vm: vm.name.clone(),
                    has_partition,
                },
            )
        }
        GpuCommand::Add { vm } => {
            let partition = ctx.config.gpu.partition()?;
            let inventory = mgr.vms().await?;
            let vm = single(&inventory, &vm)?;
            let task = Task::start(ctx.mode, format!("Adding GPU partition to {}", vm.name));
            mgr.add_gpu_partition(&vm.name, &partition).await?;
            task.finish(format!("GPU partition added to {}", vm.name));
            report::emit(
                ctx.format,
                &Message::new(format!(
                    "GPU partition added to VM '{}'; install matching GPU drivers in the guest",
                    vm.name
                )),
            )
        }
        GpuCommand::Remove { vm } => {
            let inventory = mgr.vms().await?;
            let vm = single(&inventory, &vm)?;
            mgr.remove_gpu_partition(&vm.name).await?;
            report::emit(
                ctx.format,
                &Message::new(format!("GPU partition removed from VM '{}'", vm.name)),
            )
        }
    }
}

// ── workspaces ───────────────────────────────────────────

/// Workspace commands that only touch files. Returns false for the ones
/// that need the shell.
fn workspace_local(action: &WorkspaceCommand, format: OutputFormat) -> Result<bool, QuickVmError> {
    let dir = paths::workspaces_dir();
    match action {
        WorkspaceCommand::List => report::emit(format, &workspace::list(&dir)?)?,
        WorkspaceCommand::Create {
            name,
            vms,
            description,
        } => {
            let ws = Workspace::new(name, description, workspace::parse_vm_list(vms))?;
            workspace::save(&dir, &ws)?;
            report::emit(
                format,
                &Message::new(format!("Workspace '{name}' created with {} VMs", ws.vms.len())),
            )?;
        }
        WorkspaceCommand::Show { name } => report::emit(format, &workspace::load(&dir, name)?)?,
        WorkspaceCommand::Delete { name } => {
            workspace::delete(&dir, name)?;
            report::emit(format, &Message::new(format!("Workspace '{name}' deleted")))?;
        }
        WorkspaceCommand::Start { .. } | WorkspaceCommand::Stop { .. } => return Ok(false),
    }
    Ok(true)
}

async fn workspace_batch<E: ShellExecutor>(
    mgr: &Manager<E>,
    ctx: &Context,
    action: WorkspaceCommand,
) -> Result<(), QuickVmError> {
    let (name, operation) = match action {
        WorkspaceCommand::Start { name } => (name, Operation::START),
        WorkspaceCommand::Stop { name } => (name, Operation::STOP),
        // Handled before the shell was built.
        _ => return Ok(()),
    };
    let ws = workspace::load(&paths::workspaces_dir(), &name)?;
    let inventory = mgr.vms().await?;
    let members = ws.members(&inventory)?;
    tracing::info!(
        workspace = %ws.name,
        vms = members.targets.len(),
        missing = members.missing.len(),
        "{}",
        operation.active
    );
    run_and_report(
        mgr,
        ctx,
        operation,
        &inventory,
        &members.targets,
        &members.missing,
    )
    .await
}

// ── enable ───────────────────────────────────────────────

async fn enable<E: ShellExecutor>(
    mgr: &Manager<E>,
    ctx: &Context,
    no_restart: bool,
) -> Result<(), QuickVmError> {
    if !mgr.is_admin().await? {
        return Err(QuickVmError::NotAdmin);
    }

    let status = mgr.hyperv_status().await;
    if status.enabled {
        return report::emit(ctx.format, &Message::new("Hyper-V is already enabled"));
    }

    let task = Task::start(ctx.mode, "Enabling Hyper-V");
    let restart_needed = mgr.enable_hyperv().await?;
    task.finish("Hyper-V enabled");

    if !restart_needed {
        return report::emit(ctx.format, &Message::new("Hyper-V enabled"));
    }
    if no_restart || !confirm(ctx, "A restart is required. Restart now?")? {
        return report::emit(
            ctx.format,
            &Message::new("Hyper-V enabled; restart the computer to finish"),
        );
    }
    mgr.schedule_restart(10).await?;
    report::emit(
        ctx.format,
        &Message::new("Hyper-V enabled; restarting in 10 seconds"),
    )
}
