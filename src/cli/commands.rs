use clap::{Parser, Subcommand};
use std::path::PathBuf;

const DEFAULT_KEY_FILE: &str = "account.json";

#[derive(Debug, Parser)]
#[command(name = "pollchain", about = "Peer-to-peer poll and vote ledger")]
pub struct Opt {
    #[arg(long, global = true, help = "TOML settings file")]
    pub config: Option<PathBuf>,
    #[arg(
        long = "peer",
        global = true,
        help = "Full node to connect to (host:port), may be repeated"
    )]
    pub peers: Vec<String>,
    #[command(subcommand)]
    pub command: Command,
}

/// Encrypted account key on disk
#[derive(Debug, Clone, clap::Args)]
pub struct KeyArgs {
    #[arg(long = "key-file", default_value = DEFAULT_KEY_FILE)]
    pub key_file: PathBuf,
    #[arg(long, help = "Password protecting the key file")]
    pub password: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "create-account", about = "Create an account and save its key")]
    CreateAccount {
        #[command(flatten)]
        key: KeyArgs,
    },
    #[command(name = "address", about = "Print the address of a saved account")]
    Address {
        #[command(flatten)]
        key: KeyArgs,
    },
    #[command(name = "serve", about = "Run a full node")]
    Serve {
        #[arg(long, help = "Address to listen on")]
        listen: Option<String>,
        #[arg(long, help = "Address announced to peers")]
        advertise: Option<String>,
        #[arg(long, help = "Database directory")]
        db: Option<PathBuf>,
        #[arg(long, help = "Proof-of-work difficulty")]
        difficulty: Option<u32>,
        #[arg(long, help = "Pull missing blocks from peers before serving")]
        sync: bool,
        #[arg(long, help = "Keep mining blocks rewarded to this address")]
        validator: Option<String>,
        #[arg(long, default_value_t = 10, help = "Seconds between mined blocks")]
        mine_interval: u64,
    },
    #[command(name = "balance", about = "Query the balance of an address")]
    Balance {
        #[arg(help = "Account address")]
        owner: String,
    },
    #[command(name = "create-poll", about = "Create a poll (costs 10 coins)")]
    CreatePoll {
        #[command(flatten)]
        key: KeyArgs,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(
            long = "option",
            required = true,
            help = "Option as TITLE or TITLE:DESCRIPTION, may be repeated"
        )]
        options: Vec<String>,
    },
    #[command(name = "issue-ticket", about = "Give an address a ticket for your poll")]
    IssueTicket {
        #[command(flatten)]
        key: KeyArgs,
        #[arg(long, help = "Signature of the poll")]
        poll: String,
        #[arg(long, help = "Address receiving the ticket")]
        owner: String,
    },
    #[command(name = "vote", about = "Vote in a poll using a ticket")]
    Vote {
        #[command(flatten)]
        key: KeyArgs,
        #[arg(long, help = "Signature of the poll")]
        poll: String,
        #[arg(long, help = "Index of the chosen option")]
        option: i32,
    },
    #[command(name = "mine", about = "Mine one block from the pending pools")]
    Mine {
        #[arg(long, help = "Address receiving the block reward")]
        validator: String,
    },
    #[command(name = "find-servers", about = "Discover servers known to the peers")]
    FindServers,
}

/// Splits `TITLE:DESCRIPTION`
pub fn parse_poll_option(raw: &str) -> (String, String) {
    match raw.split_once(':') {
        Some((title, description)) => (title.trim().to_string(), description.trim().to_string()),
        None => (raw.trim().to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vote_command() {
        let opt = Opt::try_parse_from([
            "pollchain",
            "--peer",
            "127.0.0.1:2001",
            "vote",
            "--password",
            "correct horse",
            "--poll",
            "abc",
            "--option",
            "2",
        ])
        .unwrap();
        assert_eq!(opt.peers, vec!["127.0.0.1:2001"]);
        match opt.command {
            Command::Vote { key, poll, option } => {
                assert_eq!(key.key_file, PathBuf::from(DEFAULT_KEY_FILE));
                assert_eq!(poll, "abc");
                assert_eq!(option, 2);
            }
            other => panic!("parsed {other:?}"),
        }
    }

    #[test]
    fn test_create_poll_needs_options() {
        assert!(Opt::try_parse_from([
            "pollchain",
            "create-poll",
            "--password",
            "pw123456",
            "--title",
            "t"
        ])
        .is_err());
    }

    #[test]
    fn test_poll_option_text() {
        assert_eq!(
            parse_poll_option("Red: the warm one"),
            ("Red".to_string(), "the warm one".to_string())
        );
        assert_eq!(parse_poll_option("Blue"), ("Blue".to_string(), String::new()));
    }
}
