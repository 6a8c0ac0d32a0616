use clap::{Args, Parser, Subcommand};

/// SIP user agent for exercising a registrar/PBX
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Log at debug level (wire dumps included)
    #[arg(long, short, global = true)]
    pub debug: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Talk to a registrar as a user agent
    Client {
        #[command(subcommand)]
        action: ClientAction,
    },
    /// Listen on UDP and log every inbound message
    Server {
        /// Bind address (defaults to the compiled-in setting)
        #[arg(long)]
        bind: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ClientAction {
    /// Register, hold the binding for `expire - 1` seconds, unregister
    Register(Account),
    /// Register, call the target and hang up after `expire - 1` seconds
    Invite {
        #[command(flatten)]
        account: Account,
        /// User part to call (defaults to the compiled-in setting)
        #[arg(long)]
        target: Option<String>,
    },
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct Account {
    #[arg(long, default_value = "un100")]
    pub domain: String,
    #[arg(long, default_value = "6001")]
    pub username: String,
    /// Empty disables digest authentication
    #[arg(long, default_value = "")]
    pub password: String,
    /// Registration lifetime in seconds
    #[arg(long, default_value_t = 5)]
    pub expire: u32,
}
