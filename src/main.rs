// Entry point for the pollchain CLI. Every command is a thin caller of the
// client façade; only `serve` owns a ledger.
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use pollchain::cli::{parse_poll_option, KeyArgs};
use pollchain::utils::current_timestamp;
use pollchain::{
    Account, Blockchain, BlockchainError, Client, Command, Opt, PollOption, Result, Server,
    Settings, Transaction,
};
use std::process;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let opt = Opt::parse();
    let settings = match Settings::load(opt.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    // RUST_LOG still wins over the configured level
    let level = LevelFilter::from_str(&settings.log_level).unwrap_or(LevelFilter::Info);
    env_logger::builder()
        .filter_level(level)
        .parse_default_env()
        .init();

    if let Err(e) = run_command(opt, settings).await {
        error!("Error: {e}");
        process::exit(1);
    }
}

async fn run_command(opt: Opt, mut settings: Settings) -> Result<()> {
    let cancel = CancellationToken::new();
    match opt.command {
        Command::CreateAccount { key } => {
            if key.key_file.exists() {
                return Err(BlockchainError::Config(format!(
                    "{} already exists",
                    key.key_file.display()
                )));
            }
            let account = Account::new()?;
            account.save(&key.key_file, &key.password)?;
            println!("Your new address: {}", account.address());
        }
        Command::Address { key } => {
            println!("{}", load_account(&key)?.address());
        }
        Command::Serve {
            listen,
            advertise,
            db,
            difficulty,
            sync,
            validator,
            mine_interval,
        } => {
            if let Some(listen) = listen {
                settings.listen_address = listen;
            }
            if let Some(advertise) = advertise {
                settings.advertised_address = advertise;
            }
            if let Some(db) = db {
                settings.db_path = db;
            }
            if let Some(difficulty) = difficulty {
                settings.difficulty = difficulty;
            }
            serve(&settings, &opt.peers, sync, validator, mine_interval).await?;
        }
        Command::Balance { owner } => {
            let client = light_client(&settings, &opt.peers).await;
            let balance = client.query_balance(&owner, &cancel).await;
            client.shutdown().await;
            let balance = balance?;
            println!("Balance of {owner}: {} coins", balance.coins);
            println!("  nonce: {}", balance.nonce);
            println!("  polls: {}", balance.polls.len());
            println!("  unused tickets: {}", balance.unused_tickets.len());
            println!("  used tickets: {}", balance.used_tickets.len());
        }
        Command::CreatePoll {
            key,
            title,
            description,
            options,
        } => {
            let options: Vec<PollOption> = options
                .iter()
                .enumerate()
                .map(|(index, raw)| {
                    let (title, description) = parse_poll_option(raw);
                    PollOption {
                        index: index as i32,
                        title,
                        description,
                    }
                })
                .collect();
            let account = load_account(&key)?;
            submit(&settings, &opt.peers, &account, |nonce, timestamp| {
                Transaction::new_poll(nonce, timestamp, &title, &description, options)
            })
            .await?;
        }
        Command::IssueTicket { key, poll, owner } => {
            let account = load_account(&key)?;
            submit(&settings, &opt.peers, &account, |nonce, timestamp| {
                Transaction::new_ticket(nonce, timestamp, &owner, &poll)
            })
            .await?;
        }
        Command::Vote { key, poll, option } => {
            let account = load_account(&key)?;
            submit(&settings, &opt.peers, &account, |nonce, timestamp| {
                Transaction::new_vote(nonce, timestamp, &poll, option)
            })
            .await?;
        }
        Command::Mine { validator } => {
            let client = light_client(&settings, &opt.peers).await;
            let mined = client.mine(&validator, &cancel).await;
            client.shutdown().await;
            match mined? {
                Some(block) => println!("Mined block {}", block.hash),
                None => println!("Mining cancelled"),
            }
        }
        Command::FindServers => {
            let client = light_client(&settings, &opt.peers).await;
            let found = client.find_servers(&cancel).await;
            let servers = client.servers();
            client.shutdown().await;
            println!("Connected to {} new servers", found?);
            for server in servers {
                println!("{server}");
            }
        }
    }
    Ok(())
}

fn load_account(key: &KeyArgs) -> Result<Account> {
    Account::load(&key.key_file, &key.password)
}

async fn connect_all(client: &Client, peers: &[String]) {
    for peer in peers {
        if let Err(e) = client.connect(peer).await {
            warn!("Could not connect to {peer}: {e}");
        }
    }
}

async fn light_client(settings: &Settings, peers: &[String]) -> Client {
    let client = Client::light(settings);
    connect_all(&client, peers).await;
    client
}

// Next free nonce for `address`, counting its transactions still pending
async fn next_nonce(client: &Client, address: &str, cancel: &CancellationToken) -> Result<i64> {
    let balance = client.query_balance(address, cancel).await?;
    let pending = client.query_pending_transactions(cancel).await?;
    let highest = pending
        .iter()
        .filter(|tx| tx.sender == address)
        .map(|tx| tx.nonce)
        .fold(balance.nonce, i64::max);
    highest
        .checked_add(1)
        .ok_or_else(|| BlockchainError::InvalidTransaction("nonce overflow".to_string()))
}

async fn submit<F>(settings: &Settings, peers: &[String], account: &Account, build: F) -> Result<()>
where
    F: FnOnce(i64, i64) -> Transaction,
{
    let cancel = CancellationToken::new();
    let client = light_client(settings, peers).await;
    let result = async {
        let nonce = next_nonce(&client, account.address(), &cancel).await?;
        let mut tx = build(nonce, current_timestamp()?);
        account.sign(&mut tx)?;
        let acknowledged = client.broadcast_transaction(&tx, &cancel).await?;
        Ok::<_, BlockchainError>((tx, acknowledged))
    }
    .await;
    client.shutdown().await;

    let (tx, acknowledged) = result?;
    println!("Submitted {} transaction {}", tx.kind(), tx.signature);
    println!("Accepted by {acknowledged} nodes");
    Ok(())
}

async fn serve(
    settings: &Settings,
    peers: &[String],
    sync: bool,
    validator: Option<String>,
    mine_interval: u64,
) -> Result<()> {
    let ledger = Blockchain::open(&settings.db_path, settings.difficulty)?;
    let server = Arc::new(Server::bind(settings, ledger).await?);
    let client = server.client().clone();
    connect_all(&client, peers).await;

    let stop = CancellationToken::new();
    if sync {
        client.sync(&stop).await?;
    }

    let miner = validator.map(|validator| {
        println!("Mining is on. Address to receive rewards: {validator}");
        let client = client.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            while !stop.is_cancelled() {
                match client.mine(&validator, &stop).await {
                    Ok(Some(block)) => info!("Mined block {}", block.hash),
                    Ok(None) => break,
                    Err(BlockchainError::Cancelled) => break,
                    Err(e) => warn!("Mining failed: {e}"),
                }
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(mine_interval)) => {}
                }
            }
        })
    });

    let result = tokio::select! {
        result = server.run() => result,
        signal = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            signal.map_err(BlockchainError::from)
        }
    };

    stop.cancel();
    if let Some(miner) = miner {
        if let Err(e) = miner.await {
            warn!("Miner task ended abnormally: {e}");
        }
    }
    server.shutdown().await;
    result
}
