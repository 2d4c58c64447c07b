//! Command-line front end for the netmodel object model.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use netmodel_core::registry::MethodBinding;
use netmodel_core::{
    CallDisposition, Config, ExtensionDispatcher, LinkType, LocalConnection, MethodCall,
    ObjectServer, ShellExecutor,
};
use serde_json::Value;

/// netmodel - network interface object model and extension dispatcher.
#[derive(Parser, Debug)]
#[command(name = "netmodeld")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file.
    #[arg(short, long, global = true, default_value = "/etc/netmodel/config.xml")]
    config: PathBuf,

    /// Wall-clock limit for one extension action, in seconds.
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u64,

    /// Directory for argument and return files.
    #[arg(long, global = true)]
    tempdir: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Load the configuration and summarize its extensions.
    CheckConfig,
    /// Print how every registered method is served.
    Bindings,
    /// Dispatch one method call and print the reply.
    Call {
        /// Target object path.
        #[arg(long)]
        object: String,
        /// Service name.
        #[arg(long)]
        interface: String,
        /// Method name.
        #[arg(long)]
        method: String,
        /// Interface object to create first, as NAME:TYPE.
        #[arg(long = "link", value_parser = parse_link)]
        links: Vec<(String, LinkType)>,
        /// Call arguments; valid JSON is passed as-is, anything else as a string.
        args: Vec<String>,
    },
}

fn parse_link(value: &str) -> Result<(String, LinkType), String> {
    let (name, kind) = value
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:TYPE, got \"{value}\""))?;
    let link = LinkType::from_name(kind).ok_or_else(|| format!("unknown link type \"{kind}\""))?;
    if name.is_empty() {
        return Err("interface name must not be empty".to_string());
    }
    Ok((name.to_string(), link))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match &args.command {
        Command::CheckConfig => check_config(&args),
        Command::Bindings => show_bindings(&args),
        Command::Call {
            object,
            interface,
            method,
            links,
            args: call_args,
        } => run_call(&args, object, interface, method, links, call_args).await,
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var("NETMODEL_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_directive = if verbose { "netmodel=debug" } else { "netmodel=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}

fn load_config(args: &Args) -> Result<Config> {
    Config::from_file(&args.config)
        .with_context(|| format!("loading configuration {}", args.config.display()))
}

fn build_server(args: &Args) -> Result<ObjectServer> {
    let config = Arc::new(load_config(args)?);
    let mut dispatcher = ExtensionDispatcher::new(config, Arc::new(ShellExecutor::new()))
        .with_timeout(Duration::from_secs(args.timeout));
    if let Some(dir) = &args.tempdir {
        dispatcher = dispatcher.with_temp_dir(dir);
    }
    ObjectServer::bootstrap(dispatcher).context("building object model")
}

fn check_config(args: &Args) -> Result<()> {
    let config = load_config(args)?;

    println!("Configuration: {}", args.config.display());
    println!(
        "  ipv4: {}  ipv6: {}",
        enabled(config.ipv4.enabled),
        enabled(config.ipv6.enabled)
    );
    println!(
        "  default update mask: {:#x}",
        config.addrconf.default_allow_update.bits()
    );
    println!(
        "  dhcp preferred servers: {}",
        config.addrconf.dhcp.preferred_servers.len()
    );

    let extensions: Vec<_> = config.extensions().collect();
    println!("Extensions: {}", extensions.len());
    for ext in extensions {
        let actions: Vec<&str> = ext.actions.iter().map(|a| a.name.as_str()).collect();
        println!(
            "  {} [{}] families={:#x} actions={}",
            ext.name,
            ext.kind,
            ext.supported_af.bits(),
            actions.join(",")
        );
    }
    Ok(())
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}

fn show_bindings(args: &Args) -> Result<()> {
    let server = build_server(args)?;
    let registry = server.registry();

    for (_, service) in registry.services() {
        let class = service
            .compatible()
            .and_then(|c| registry.class_name(c))
            .unwrap_or("-");
        println!("{} (class {})", service.name(), class);
        for method in service.methods() {
            let binding = match method.binding() {
                MethodBinding::Unbound => "unbound".to_string(),
                MethodBinding::BuiltIn(_) => "builtin".to_string(),
                MethodBinding::Extension(hook) => {
                    format!("extension {}:{}", hook.extension, hook.action)
                }
            };
            match method.signature() {
                "" => println!("  {}.{} -> {}", service.name(), method.name(), binding),
                signature => println!(
                    "  {}.{} -> {} [{}]",
                    service.name(),
                    method.name(),
                    binding,
                    signature
                ),
            }
        }
        for property in service.properties() {
            println!("  property {}: {}", property.name, property.signature);
        }
    }
    Ok(())
}

async fn run_call(
    args: &Args,
    object: &str,
    interface: &str,
    method: &str,
    links: &[(String, LinkType)],
    call_args: &[String],
) -> Result<()> {
    let server = build_server(args)?;
    for (name, link) in links {
        server
            .add_interface(name, *link)
            .with_context(|| format!("creating interface {name}"))?;
    }

    let mut call = MethodCall::new(1, object, interface, method);
    for arg in call_args {
        let value = serde_json::from_str::<Value>(arg).unwrap_or_else(|_| Value::from(arg.as_str()));
        call = call.with_arg(value);
    }

    let (conn, mut rx) = LocalConnection::new();
    if let CallDisposition::Pending(pending) = server.handle_call(Arc::new(conn), call) {
        let outcome = pending.wait().await;
        tracing::debug!(outcome = ?outcome, "extension action finished");
    }

    let reply = rx.recv().await.context("no reply received")?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    if let Some(err) = reply.error() {
        bail!("call failed: {err}");
    }
    Ok(())
}
