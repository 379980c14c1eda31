use clap::{Parser, Subcommand};
use grustyvman_devices::backend::capabilities::CapabilitySnapshot;
use grustyvman_devices::backend::editor::{EditTarget, EditorCommand, EditorExit, OverrideEditor};
use grustyvman_devices::config::Settings;
use grustyvman_devices::error::AppError;
use grustyvman_devices::models::{DomainSession, EditOutcome};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "grustyvman-devices", about = "Inspect, validate and edit libvirt domain devices")]
struct Args {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmds,
}

#[derive(Subcommand)]
enum Cmds {
    /// List the devices of a domain definition
    Devices { file: PathBuf },
    /// Validate every device, optionally against a domain capabilities file
    Check {
        file: PathBuf,
        /// `virsh domcapabilities` output to validate against
        #[arg(long, conflicts_with = "live")]
        caps: Option<PathBuf>,
        /// Ask the hypervisor for its capabilities
        #[arg(long)]
        live: bool,
    },
    /// Re-encode a domain definition
    Fmt {
        file: PathBuf,
        /// Rewrite the file instead of printing
        #[arg(short, long)]
        in_place: bool,
    },
    /// Edit one device (or the whole domain) in an external editor
    Edit {
        file: PathBuf,
        /// Index of the device to edit; the whole domain when omitted
        #[arg(short, long)]
        device: Option<usize>,
        /// Editor command, overriding settings and $VISUAL / $EDITOR
        #[arg(long)]
        editor: Option<String>,
    },
    /// Summarize a domain capabilities file
    Caps { file: PathBuf },
    /// Define the domain on the configured connection
    Define {
        file: PathBuf,
        /// Refuse to define while capability violations remain
        #[arg(long)]
        strict: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    let settings = match &args.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    match args.cmd {
        Cmds::Devices { file } => {
            let session = load_session(&settings, &file)?;
            for (index, device) in session.devices().iter().enumerate() {
                match device.alias() {
                    Some(alias) => println!("{index:>3}  {:<12} {} ({alias})", device.kind(), device.display_name()),
                    None => println!("{index:>3}  {:<12} {}", device.kind(), device.display_name()),
                }
            }
            Ok(())
        }
        Cmds::Check { file, caps, live } => {
            let session = load_session(&settings, &file)?;
            let snapshot = match (caps, live) {
                (Some(path), _) => Some(CapabilitySnapshot::from_xml(&std::fs::read_to_string(path)?)?),
                (None, true) => Some(live_capabilities(&settings, &session)?),
                (None, false) => None,
            };
            let violations = session.validate_all(snapshot.as_ref());
            if violations.is_empty() {
                println!("No problems found");
                return Ok(());
            }
            for v in &violations {
                println!("{:>3}  {:<12} {}", v.index, v.kind, v.violation);
            }
            std::process::exit(2);
        }
        Cmds::Fmt { file, in_place } => {
            let session = load_session(&settings, &file)?;
            let xml = session.to_xml()?;
            if in_place {
                std::fs::write(&file, xml)?;
            } else {
                print!("{xml}");
            }
            Ok(())
        }
        Cmds::Edit { file, device, editor } => {
            let mut session = load_session(&settings, &file)?;
            let command = match editor.as_deref().and_then(EditorCommand::parse) {
                Some(command) => command,
                None => EditorCommand::resolve(settings.editor.as_deref()),
            };
            let target = device.map_or(EditTarget::Domain, EditTarget::Device);
            if edit(&mut session, OverrideEditor::new(command), target).await? {
                std::fs::write(&file, session.to_xml()?)?;
                println!("Updated {}", file.display());
            }
            Ok(())
        }
        Cmds::Caps { file } => {
            let snapshot = CapabilitySnapshot::from_xml(&std::fs::read_to_string(file)?)?;
            print_capabilities(&snapshot);
            Ok(())
        }
        Cmds::Define { file, strict } => {
            let session = load_session(&settings, &file)?;
            define(&settings, &session, strict || settings.strict_capabilities)
        }
    }
}

fn load_session(settings: &Settings, file: &Path) -> Result<DomainSession, AppError> {
    let xml = std::fs::read_to_string(file)?;
    Ok(DomainSession::from_xml(&settings.connection_uri, &xml)?.with_temp_dir(settings.temp_dir.clone()))
}

/// Run the editor until the buffer is applied, left unchanged or abandoned.
/// Malformed XML reopens the editor on the same buffer. Returns whether the
/// session changed.
async fn edit(session: &mut DomainSession, editor: OverrideEditor, target: EditTarget) -> Result<bool, AppError> {
    let mut buffer = session.export_for_edit(target)?;
    loop {
        let task = editor.spawn(buffer);
        let token = task.cancel_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
        let exit = task.wait().await;
        interrupt.abort();
        buffer = match exit {
            EditorExit::Exited(buffer) => buffer,
            EditorExit::Cancelled => return Ok(false),
            EditorExit::LaunchFailed(failure) => return Err(failure.error),
        };
        match session.apply_edit(buffer) {
            Ok(EditOutcome::Applied) => return Ok(true),
            Ok(EditOutcome::Cancelled) => {
                println!("No changes");
                return Ok(false);
            }
            Ok(EditOutcome::Conflict(conflict)) => return Err(conflict.into()),
            Err(failure) if failure.error.is_malformed_xml() => {
                eprintln!("{}; reopening {}", failure.error, failure.buffer.path().display());
                buffer = failure.buffer;
            }
            Err(failure) => return Err(failure.error),
        }
    }
}

fn print_capabilities(snapshot: &CapabilitySnapshot) {
    let show = |label: &str, value: &Option<String>| {
        if let Some(v) = value {
            println!("{label:<10} {v}");
        }
    };
    show("Emulator", &snapshot.emulator);
    show("Type", &snapshot.virt_type);
    show("Machine", &snapshot.machine);
    show("Arch", &snapshot.arch);

    for (kind, caps) in snapshot.kinds() {
        if !caps.supported {
            println!("{kind}: not supported");
            continue;
        }
        println!("{kind}:");
        for (field, values) in caps.fields() {
            let values: Vec<&str> = values.iter().map(String::as_str).collect();
            println!("  {field:<16} {}", values.join(", "));
        }
    }
    for (name, supported) in snapshot.features() {
        println!("feature {name}: {}", if supported { "yes" } else { "no" });
    }
}

#[cfg(feature = "libvirt")]
fn live_capabilities(settings: &Settings, session: &DomainSession) -> Result<CapabilitySnapshot, AppError> {
    use grustyvman_devices::backend::connection::{DomainBackend, DomainRef, LibvirtBackend};

    LibvirtBackend.fetch_capabilities(&settings.connection_uri, &DomainRef::from_document(session.document()))
}

#[cfg(not(feature = "libvirt"))]
fn live_capabilities(_settings: &Settings, _session: &DomainSession) -> Result<CapabilitySnapshot, AppError> {
    Err(AppError::BackendUnavailable(
        "built without libvirt support (enable the `libvirt` feature)".to_string(),
    ))
}

#[cfg(feature = "libvirt")]
fn define(settings: &Settings, session: &DomainSession, strict: bool) -> Result<(), AppError> {
    use grustyvman_devices::backend::connection::{CapabilityCache, DomainRef, LibvirtBackend};

    let backend = LibvirtBackend;
    let cache = CapabilityCache::new();
    let snapshot = match cache.refresh(&backend, &settings.connection_uri, &DomainRef::from_document(session.document())) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            log::warn!("Validating without capabilities: {e}");
            None
        }
    };
    session.define(&backend, snapshot.as_deref(), strict)?;
    println!("Defined {}", session.document().name.as_deref().unwrap_or("domain"));
    Ok(())
}

#[cfg(not(feature = "libvirt"))]
fn define(_settings: &Settings, _session: &DomainSession, _strict: bool) -> Result<(), AppError> {
    Err(AppError::BackendUnavailable(
        "built without libvirt support (enable the `libvirt` feature)".to_string(),
    ))
}
