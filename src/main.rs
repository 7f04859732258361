use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use virtpilot::{
    ActionRequest, ConnectParams, CreateVmRequest, ErrorKind, HypervisorPath, MigrationJob,
    Orchestrator, PilotError, Protocol, VmAction, config::PilotConfig, logger,
};

#[derive(Parser)]
#[command(name = "virtpilot")]
#[command(about = "Manage virtual machines through a remote hypervisor control API")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the control API base URL
    #[arg(long)]
    api: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a hypervisor and start a 20 minute session
    Connect {
        /// Transport: qemu (local), qemu+ssh, or any libvirt protocol
        #[arg(long, default_value = "qemu")]
        protocol: String,
        /// Remote user
        #[arg(long)]
        user: Option<String>,
        /// Remote host
        #[arg(long)]
        host: Option<String>,
        /// Remote port
        #[arg(long)]
        port: Option<u16>,
        /// Hypervisor path: system or session
        #[arg(long, default_value = "system")]
        path: String,
    },
    /// Forget the current session
    Logout,
    /// Show the current session
    Status,
    /// List all VMs on the connected hypervisor
    #[command(alias = "ls")]
    List,
    /// Start a VM
    Start { name: String },
    /// Force off a VM
    Stop { name: String },
    /// Ask a VM to shut down gracefully
    Shutdown { name: String },
    /// Delete a VM and its disk (irreversible)
    Delete {
        name: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Create and start a new VM
    Create {
        /// Name of the VM
        name: Option<String>,
        /// Number of virtual CPUs (1-32)
        #[arg(long, default_value_t = 1)]
        cpu: u32,
        /// Memory in MB (256-4096)
        #[arg(long, default_value_t = 256)]
        memory: u32,
        /// ISO image name on the hypervisor's image store
        #[arg(long)]
        iso: Option<String>,
        /// Disk size in MB (1024-102400)
        #[arg(long, default_value_t = 10240)]
        disk: u32,
        /// Network to attach
        #[arg(long)]
        network: Option<String>,
        /// Print the configured ISO images and exit
        #[arg(long)]
        list_isos: bool,
    },
    /// Live-migrate a VM to another hypervisor
    Migrate {
        /// VM name to migrate
        name: String,
        /// Destination hypervisor URI, e.g. qemu+ssh://user@host/system
        destination: String,
    },
    /// Open a browser console (noVNC) for a VM
    Console { name: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.verbose {
        unsafe {
            std::env::set_var("RUST_LOG", "virtpilot=debug");
        }
    }
    logger::init_logger();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<PilotError>().map(PilotError::kind) {
                Some(ErrorKind::NotConnected) => {
                    eprintln!("Not connected. Run `virtpilot connect` first.");
                }
                _ => eprintln!("Error: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(PilotConfig::default_path);
    let mut config = if config_path.exists() {
        PilotConfig::from_file(&config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?
    } else {
        if cli.config.is_some() {
            logger::warn!(
                "Config not found at {}, using defaults",
                config_path.display()
            );
        }
        PilotConfig::default()
    };
    if let Some(api) = cli.api {
        config.api.base_url = api;
    }

    let orchestrator = Orchestrator::from_config(&config);

    match cli.command {
        Commands::Connect {
            protocol,
            user,
            host,
            port,
            path,
        } => {
            let params = ConnectParams {
                protocol: protocol.parse::<Protocol>()?,
                user,
                host,
                port,
                path: path.parse::<HypervisorPath>()?,
            };
            let session = orchestrator.connect(params).await?;
            println!(
                "Connected. Session valid until {}",
                session.expires_at().format("%H:%M:%S UTC")
            );
        }
        Commands::Logout => {
            orchestrator.logout();
            println!("Session cleared");
        }
        Commands::Status => match orchestrator.session() {
            Some(session) => {
                let uri = virtpilot::uri::build_uri(Some(&session)).unwrap_or_default();
                let remaining = orchestrator
                    .sessions()
                    .remaining()
                    .map(|d| d.num_seconds().max(0))
                    .unwrap_or(0);
                println!("Connected to {}", uri);
                println!(
                    "Session expires in {}m {:02}s",
                    remaining / 60,
                    remaining % 60
                );
            }
            None => return Err(PilotError::NotConnected.into()),
        },
        Commands::List => {
            let vms = orchestrator.synchronizer().sync().await?;

            println!("{:<32} {:<10}", "NAME", "STATE");
            println!("{}", "=".repeat(43));
            for vm in &vms {
                println!("{:<32} {:<10}", vm.name, vm.state_label());
            }
            if vms.is_empty() {
                println!("No VMs defined");
            }
        }
        Commands::Start { name } => run_action(&orchestrator, VmAction::Start, name).await?,
        Commands::Stop { name } => run_action(&orchestrator, VmAction::Stop, name).await?,
        Commands::Shutdown { name } => {
            run_action(&orchestrator, VmAction::Shutdown, name).await?
        }
        Commands::Delete { name, yes } => {
            let skip_prompt = yes || !config.ui.confirm_destructive_actions;
            if !skip_prompt && !confirm(&format!("Delete VM '{}' and its disk?", name))? {
                println!("Aborted");
                return Ok(());
            }
            let request = ActionRequest::new(VmAction::Delete, name).confirmed();
            report_action(&orchestrator, request).await?;
        }
        Commands::Create {
            name,
            cpu,
            memory,
            iso,
            disk,
            network,
            list_isos,
        } => {
            if list_isos {
                for image in &config.create.iso_images {
                    println!("{}", image);
                }
                return Ok(());
            }

            let request = CreateVmRequest {
                name: name.unwrap_or_default(),
                cpu_count: cpu,
                memory_mb: memory,
                iso_image: iso.unwrap_or_default(),
                disk_size_mb: disk,
                network,
            };
            let response = orchestrator.create_vm(request).await?;
            println!(
                "{}",
                response
                    .message
                    .unwrap_or_else(|| "VM created".to_string())
            );
        }
        Commands::Migrate { name, destination } => {
            let job = orchestrator
                .migration()
                .initiate(&name, &destination)
                .await
                .map_err(|e| match e {
                    virtpilot::migration::MigrationError::Rejected(inner) => {
                        anyhow::Error::new(inner)
                    }
                    other => anyhow::Error::new(other),
                })?;

            match job {
                MigrationJob::Succeeded { message, .. } => println!("{}", message),
                MigrationJob::Failed { message, .. } => {
                    anyhow::bail!("Migration of '{}' failed: {}", name, message)
                }
                _ => {}
            }
        }
        Commands::Console { name } => {
            let url = orchestrator.console().launch(&name).await?;
            println!("{}", url);
        }
    }

    Ok(())
}

async fn run_action(orchestrator: &Orchestrator, action: VmAction, name: String) -> anyhow::Result<()> {
    report_action(orchestrator, ActionRequest::new(action, name)).await
}

async fn report_action(orchestrator: &Orchestrator, request: ActionRequest) -> anyhow::Result<()> {
    match orchestrator.dispatcher().dispatch(request).await {
        Ok(outcome) => {
            println!(
                "{} '{}': {}",
                outcome.action,
                outcome.vm_name,
                outcome.message.as_deref().unwrap_or("ok")
            );
            if !outcome.refreshed {
                logger::warn!("VM list could not be refreshed");
            }
            Ok(())
        }
        Err(failure) if failure.is_not_connected() => Err(failure.source.into()),
        Err(failure) => Err(failure.into()),
    }
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{} [y/N]: ", question);
    io::stdout().flush().ok();

    let mut input = String::new();
    io::stdin()
        .read_line(&mut input)
        .context("failed to read confirmation")?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}
