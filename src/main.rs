use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{bail, ensure, Context, Result};
use clap::{Args, Parser, Subcommand};
use ed25519_dalek::SigningKey;
use rand::{rngs::OsRng, RngCore};
use tracing_subscriber::EnvFilter;

use blp_token::{
    config::{resolve_initial_holder, TokenConfig},
    ledger::snapshot::known_accounts,
    Address, Amount, EventLog, Ledger, Store, UNLIMITED_ALLOWANCE,
};

#[derive(Parser)]
#[command(name = "blp", version)]
#[command(about = "BLP fixed-supply token ledger")]
struct Cli {
    /// Ledger state file
    #[arg(long, global = true, value_name = "FILE", default_value = "blp-state.json")]
    state: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue the whole supply to the initial holder and create the state file
    Deploy {
        /// Initial holder; falls back to $INIT_DAO_WALLET
        #[arg(long, value_name = "ADDR")]
        holder: Option<String>,
        /// Token parameters (JSON); defaults to BLPToken/BLP/18, 1e9 tokens
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Token metadata, supply and state root
    Info,
    /// Balance of an account in smallest units
    Balance { account: Address },
    /// Remaining allowance of SPENDER over OWNER's balance
    Allowance { owner: Address, spender: Address },
    /// Move tokens from the caller to TO
    Transfer {
        #[command(flatten)]
        caller: CallerArgs,
        to: Address,
        amount: Amount,
    },
    /// Set (overwrite) SPENDER's allowance over the caller's balance
    Approve {
        #[command(flatten)]
        caller: CallerArgs,
        spender: Address,
        /// Smallest units, or "unlimited"
        #[arg(value_parser = parse_allowance)]
        amount: Amount,
    },
    /// Move tokens from FROM to TO using the caller's allowance
    TransferFrom {
        #[command(flatten)]
        caller: CallerArgs,
        from: Address,
        to: Address,
        amount: Amount,
    },
    /// Print the event log as JSON lines
    Events {
        /// Only events touching this account
        #[arg(long, value_name = "ADDR")]
        account: Option<Address>,
    },
    /// Recheck the supply invariant and replay the event log against the state
    Verify,
    /// Generate an ed25519 key and print the account it controls
    Keygen {
        /// Also write sk.hex / pk.hex into this directory
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct CallerArgs {
    /// Act as this account
    #[arg(long, value_name = "ADDR")]
    caller: Option<Address>,
    /// Act as the account of this ed25519 secret key (64 hex chars)
    #[arg(long, value_name = "HEX")]
    sk_hex: Option<String>,
}

impl CallerArgs {
    fn resolve(&self) -> Result<Address> {
        match (&self.caller, &self.sk_hex) {
            (Some(addr), _) => Ok(*addr),
            (None, Some(sk_hex)) => {
                let raw = hex::decode(sk_hex.trim()).context("invalid --sk-hex")?;
                let bytes: [u8; 32] = raw
                    .as_slice()
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("--sk-hex must be 32 bytes, got {}", raw.len()))?;
                let sk = SigningKey::from_bytes(&bytes);
                Ok(Address::from_verifying_key(&sk.verifying_key()))
            }
            (None, None) => bail!("either --caller or --sk-hex is required"),
        }
    }
}

fn parse_allowance(s: &str) -> Result<Amount, String> {
    if s.eq_ignore_ascii_case("unlimited") || s.eq_ignore_ascii_case("max") {
        return Ok(UNLIMITED_ALLOWANCE);
    }
    s.parse::<Amount>().map_err(|e| format!("{e}"))
}

/// Renders smallest units as a decimal token amount, trailing zeros trimmed.
fn format_units(amount: Amount, decimals: u8) -> String {
    if amount == UNLIMITED_ALLOWANCE {
        return "unlimited".to_string();
    }
    let Some(scale) = 10u128.checked_pow(decimals as u32) else {
        return amount.to_string();
    };
    let whole = amount / scale;
    let frac = amount % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:0width$}", frac, width = decimals as usize);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn deploy_cmd(state: &Path, holder: Option<String>, config: Option<PathBuf>) -> Result<()> {
    let config = match config {
        Some(path) => TokenConfig::load(&path)?,
        None => TokenConfig::default(),
    };
    let holder = resolve_initial_holder(holder.as_deref())?;
    let total_supply = config.total_supply()?;

    let mut events = EventLog::new();
    let ledger = Ledger::initialize(holder, total_supply, config.metadata(), &mut events)
        .context("initial issuance failed")?;
    let store = Store::create(state, ledger, events)?;

    println!(
        "{} ({}) deployed → {}",
        store.ledger.name(),
        store.ledger.symbol(),
        store.path().display()
    );
    println!("  holder:       {holder}");
    println!(
        "  total supply: {} ({} units)",
        format_units(total_supply, store.ledger.decimals()),
        total_supply
    );
    Ok(())
}

fn info_cmd(store: &Store) {
    let ledger = &store.ledger;
    let snapshot = ledger.snapshot();
    println!("name:         {}", ledger.name());
    println!("symbol:       {}", ledger.symbol());
    println!("decimals:     {}", ledger.decimals());
    println!(
        "total supply: {} ({} units)",
        format_units(ledger.total_supply(), ledger.decimals()),
        ledger.total_supply()
    );
    println!("holders:      {}", ledger.holders().count());
    println!("accounts:     {}", known_accounts(&snapshot).len());
    println!("height:       {}", ledger.height());
    println!("events:       {}", store.events.len());
    println!("state root:   {}", hex::encode(snapshot.state_root));
}

fn verify_cmd(store: &Store) -> Result<()> {
    let ledger = &store.ledger;
    let sum = ledger
        .circulating_sum()
        .context("balances overflow when summed")?;
    ensure!(
        sum == ledger.total_supply(),
        "balances sum to {sum}, total supply is {}",
        ledger.total_supply()
    );
    ensure!(
        ledger.matches_log(&store.events),
        "event log does not replay to the stored state"
    );
    println!(
        "ok: {} holders, supply {} intact, {} events replayed, root {}",
        ledger.holders().count(),
        sum,
        store.events.len(),
        hex::encode(ledger.state_root())
    );
    Ok(())
}

fn keygen_cmd(out_dir: Option<PathBuf>) -> Result<()> {
    let mut sk_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut sk_bytes);
    let sk = SigningKey::from_bytes(&sk_bytes);
    let pk = sk.verifying_key();
    let address = Address::from_verifying_key(&pk);

    if let Some(dir) = out_dir {
        fs::create_dir_all(&dir).with_context(|| format!("mkdir {}", dir.display()))?;
        fs::write(dir.join("sk.hex"), hex::encode(sk_bytes)).context("write sk.hex")?;
        fs::write(dir.join("pk.hex"), hex::encode(pk.as_bytes())).context("write pk.hex")?;
        println!("keypair written → {}", dir.display());
    } else {
        println!("sk:      {}", hex::encode(sk_bytes));
    }
    println!("pk:      {}", hex::encode(pk.as_bytes()));
    println!("address: {address}");
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Deploy { holder, config } => deploy_cmd(&cli.state, holder, config),
        Commands::Keygen { out_dir } => keygen_cmd(out_dir),
        Commands::Info => {
            info_cmd(&Store::load(&cli.state)?);
            Ok(())
        }
        Commands::Balance { account } => {
            let store = Store::load(&cli.state)?;
            let balance = store.ledger.balance_of(&account);
            println!(
                "{balance} ({} {})",
                format_units(balance, store.ledger.decimals()),
                store.ledger.symbol()
            );
            Ok(())
        }
        Commands::Allowance { owner, spender } => {
            let store = Store::load(&cli.state)?;
            let allowance = store.ledger.allowance(&owner, &spender);
            println!(
                "{allowance} ({})",
                format_units(allowance, store.ledger.decimals())
            );
            Ok(())
        }
        Commands::Transfer { caller, to, amount } => {
            let caller = caller.resolve()?;
            let mut store = Store::load(&cli.state)?;
            store
                .ledger
                .transfer(&caller, &to, amount, &mut store.events)
                .with_context(|| format!("transfer {amount} from {caller} to {to}"))?;
            store.save()?;
            println!("transferred {amount} from {caller} to {to}");
            Ok(())
        }
        Commands::Approve {
            caller,
            spender,
            amount,
        } => {
            let caller = caller.resolve()?;
            let mut store = Store::load(&cli.state)?;
            store
                .ledger
                .approve(&caller, &spender, amount, &mut store.events)
                .with_context(|| format!("approve {spender} for {caller}"))?;
            store.save()?;
            println!(
                "{spender} may now spend {} of {caller}",
                format_units(amount, store.ledger.decimals())
            );
            Ok(())
        }
        Commands::TransferFrom {
            caller,
            from,
            to,
            amount,
        } => {
            let caller = caller.resolve()?;
            let mut store = Store::load(&cli.state)?;
            store
                .ledger
                .transfer_from(&caller, &from, &to, amount, &mut store.events)
                .with_context(|| format!("{caller} moving {amount} from {from} to {to}"))?;
            store.save()?;
            println!(
                "transferred {amount} from {from} to {to}; remaining allowance {}",
                format_units(store.ledger.allowance(&from, &caller), store.ledger.decimals())
            );
            Ok(())
        }
        Commands::Events { account } => {
            let store = Store::load(&cli.state)?;
            let selected: Vec<_> = match &account {
                Some(addr) => store.events.involving(addr).collect(),
                None => store.events.iter().collect(),
            };
            for event in selected {
                println!("{}", serde_json::to_string(event)?);
            }
            Ok(())
        }
        Commands::Verify => verify_cmd(&Store::load(&cli.state)?),
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
