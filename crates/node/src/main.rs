use clap::{Args, CommandFactory, Parser, Subcommand, error::ErrorKind};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;
use tracing_subscriber::EnvFilter;
use universal_chain::{Chains, DataProvider, RegistryEntry, RegistryProvider};
use universal_dkls::EchoProtocol;
use universal_node::demo::{DemoSigner, LogBroadcaster, PrintDriver};
use universal_node::{ChainInterfaces, Node, NodeConfig};
use universal_store::EventStore;
use universal_tss::TssConfig;
use universal_types::{Event, ProtocolType, SignData};

#[derive(Parser)]
#[command(name = "universal-node", version, about = "Universal Client TSS node")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the client node until interrupted
    Node(NodeArgs),
    /// Queue a distributed key generation event
    Keygen(EventArgs),
    /// Queue a key refresh event for the current key
    Keyrefresh(EventArgs),
    /// Queue a signing event
    Sign(SignArgs),
}

#[derive(Args)]
struct NodeArgs {
    /// Validator-operator address this node acts for
    #[arg(long)]
    validator_address: String,

    /// 32-byte hex seed the transport identity derives from
    #[arg(long, env = "UV_PRIVATE_KEY", hide_env_values = true)]
    private_key: String,

    /// Multiaddrs to listen on
    #[arg(long, default_value = "/ip4/127.0.0.1/tcp/0")]
    p2p_listen: Vec<String>,

    /// Node home directory (keyshare vault, event table)
    #[arg(long)]
    home: PathBuf,

    /// Keyshare vault password
    #[arg(long, env = "UV_PASSWORD", hide_env_values = true)]
    password: String,

    /// Shared registry file standing in for on-chain network state
    #[arg(long)]
    registry: PathBuf,

    /// Percentage of eligible validators sampled into SIGN sessions
    #[arg(long, default_value_t = 66)]
    threshold: u64,
}

/// Event commands must run with identical arguments on every node in the
/// fleet: the event id is derived from them, and the stores have to agree.
#[derive(Args)]
struct EventArgs {
    #[arg(long)]
    home: PathBuf,

    #[arg(long)]
    registry: PathBuf,

    /// Existing key id to refresh; a fresh keygen mints its own when omitted
    #[arg(long)]
    key_id: Option<String>,

    /// Blocks until the event expires
    #[arg(long, default_value_t = 1000)]
    expiry_blocks: u64,
}

#[derive(Args)]
struct SignArgs {
    #[arg(long)]
    home: PathBuf,

    #[arg(long)]
    registry: PathBuf,

    /// Key to sign with
    #[arg(long)]
    key_id: String,

    /// Hex-encoded 32-byte digest to sign
    #[arg(long)]
    message: String,

    /// Destination chain (CAIP id)
    #[arg(long, default_value = "eip155:1")]
    chain_id: String,

    #[arg(long, default_value_t = 1000)]
    expiry_blocks: u64,
}

enum CliError {
    /// Bad input from the operator; exit code 1
    User(String),
    /// The node could not come up; exit code 2
    Init(String),
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::User(message)) => {
            eprintln!("error: {message}");
            let _ = Cli::command().print_help();
            ExitCode::from(1)
        }
        Err(CliError::Init(message)) => {
            eprintln!("initialization failed: {message}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Node(args) => run_node(args).await,
        Command::Keygen(args) => queue_keygen(args, ProtocolType::Keygen).await,
        Command::Keyrefresh(args) => queue_keygen(args, ProtocolType::Keyrefresh).await,
        Command::Sign(args) => queue_sign(args).await,
    }
}

async fn run_node(args: NodeArgs) -> Result<(), CliError> {
    if args.validator_address.is_empty() {
        return Err(CliError::User("validator address must not be empty".into()));
    }
    let seed = universal_networking::parse_seed(&args.private_key)
        .map_err(|e| CliError::User(e.to_string()))?;
    let p2p_listen = args
        .p2p_listen
        .iter()
        .map(|a| a.parse())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CliError::User(format!("bad listen address: {e}")))?;

    let registry = Arc::new(RegistryProvider::new(&args.registry));
    let chains = Chains::new();
    chains.register(Arc::new(PrintDriver::new("eip155:1")));
    let chain = ChainInterfaces {
        provider: Arc::clone(&registry) as Arc<dyn DataProvider>,
        signer: Arc::new(DemoSigner::new(&args.validator_address, seed)),
        broadcaster: Arc::new(LogBroadcaster::new()),
        chains,
    };

    let mut tss = TssConfig::new(args.validator_address.clone());
    tss.threshold_percent = args.threshold;
    let config = NodeConfig {
        home: args.home,
        password: args.password,
        p2p_seed: seed,
        p2p_listen,
        tss,
    };

    let node = Node::start(config, chain, Arc::new(EchoProtocol))
        .await
        .map_err(|e| CliError::Init(e.to_string()))?;

    // Publish this node's reachable identity so the rest of the fleet can
    // discover it on demand.
    registry
        .publish(RegistryEntry {
            validator_address: args.validator_address.clone(),
            peer_id: node.peer_id().to_string(),
            multiaddrs: node.listen_addrs().iter().map(ToString::to_string).collect(),
            last_updated: unix_now(),
            status: universal_types::ValidatorStatus::Active,
        })
        .map_err(|e| CliError::Init(e.to_string()))?;

    info!(
        validator = %args.validator_address,
        peer_id = %node.peer_id(),
        "node running, ctrl-c to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CliError::Init(e.to_string()))?;
    node.shutdown().await;
    Ok(())
}

async fn queue_keygen(args: EventArgs, protocol: ProtocolType) -> Result<(), CliError> {
    if let Some(key_id) = &args.key_id {
        if key_id.is_empty() {
            return Err(CliError::User("key id must not be empty".into()));
        }
    }
    let registry = RegistryProvider::new(&args.registry);
    let latest = registry
        .latest_block_num()
        .await
        .map_err(|e| CliError::Init(e.to_string()))?;

    let kind = match protocol {
        ProtocolType::Keyrefresh => "keyrefresh",
        _ => "keygen",
    };
    let event_id = match &args.key_id {
        Some(key_id) => format!("{kind}-{latest}-{key_id}"),
        None => format!("{kind}-{latest}"),
    };
    let payload = args
        .key_id
        .map(|k| k.into_bytes())
        .unwrap_or_default();

    insert_event(
        &args.home,
        Event::new(
            event_id.clone(),
            latest,
            protocol,
            latest + args.expiry_blocks,
            payload,
        ),
    )?;
    println!("queued {event_id} at block {latest}");
    Ok(())
}

async fn queue_sign(args: SignArgs) -> Result<(), CliError> {
    let digest = hex::decode(args.message.trim_start_matches("0x"))
        .map_err(|e| CliError::User(format!("message is not hex: {e}")))?;
    if digest.len() != 32 {
        return Err(CliError::User(format!(
            "message digest must be 32 bytes, got {}",
            digest.len()
        )));
    }

    let registry = RegistryProvider::new(&args.registry);
    let latest = registry
        .latest_block_num()
        .await
        .map_err(|e| CliError::Init(e.to_string()))?;

    let event_id = format!("sign-{}", &hex::encode(&digest)[..16]);
    let data = SignData {
        key_id: args.key_id,
        message_hash: hex::encode(&digest),
        derivation_path: String::new(),
        chain_id: args.chain_id,
    };

    insert_event(
        &args.home,
        Event::new(
            event_id.clone(),
            latest,
            ProtocolType::Sign,
            latest + args.expiry_blocks,
            data.to_bytes(),
        ),
    )?;
    println!("queued {event_id} at block {latest}");
    Ok(())
}

fn insert_event(home: &std::path::Path, event: Event) -> Result<(), CliError> {
    let store =
        EventStore::open(home.join("events.json")).map_err(|e| CliError::Init(e.to_string()))?;
    match store.insert(event) {
        Ok(()) => Ok(()),
        Err(universal_store::Error::EventExists(id)) => {
            Err(CliError::User(format!("event {id} is already queued")))
        }
        Err(e) => Err(CliError::Init(e.to_string())),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
