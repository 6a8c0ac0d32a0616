use std::io;
use std::net::{AddrParseError, SocketAddr, UdpSocket};
use std::thread;
use std::time::Duration;

use log::{info, warn};
use thiserror::Error;

use sip_core::{parse_message, Client, ClientConfig, Message, SipError};

use crate::cli::{Account, ClientAction, Cli, Command};

pub mod cli;
mod settings;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("sip error: {0}")]
    Sip(#[from] SipError),
    #[error("invalid address {value:?}: {source}")]
    Address {
        value: String,
        source: AddrParseError,
    },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

pub fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Command::Client {
            action: ClientAction::Register(account),
        } => register(&account),
        Command::Client {
            action: ClientAction::Invite { account, target },
        } => invite(&account, target),
        Command::Server { bind } => {
            serve(bind.as_deref().unwrap_or(settings::SETTINGS.server_bind))
        }
    }
}

fn client_config(account: &Account) -> Result<ClientConfig, AppError> {
    let settings = &settings::SETTINGS;
    Ok(ClientConfig {
        bind: parse_addr(settings.bind_addr)?,
        registrar_port: settings.registrar_port,
        target: settings.call_target.into(),
        rtp_port: settings.rtp_port,
        ..ClientConfig::new(&account.domain, &account.username, &account.password)
    })
}

// Keep the binding until just before it would lapse.
fn hold(expire: u32) {
    thread::sleep(Duration::from_secs(expire.saturating_sub(1).into()));
}

fn register(account: &Account) -> Result<(), AppError> {
    let client = Client::connect(client_config(account)?)?;

    let registration = client.register(account.expire)?;
    info!(
        "registered {} (granted {:?}s)",
        client.config().address_of_record(),
        registration.expires()
    );
    hold(account.expire);
    registration.release()?;
    info!("unregistered");
    Ok(())
}

fn invite(account: &Account, target: Option<String>) -> Result<(), AppError> {
    let mut config = client_config(account)?;
    if let Some(target) = target {
        config.target = target;
    }
    let client = Client::connect(config)?;

    let registration = client.register(account.expire)?;
    let call = client.invite()?;
    info!("call to {} established", client.config().target_uri());
    if let Some(media) = call.dialog().as_ref().and_then(|d| d.remote_media()) {
        info!(
            "remote media at {}:{} (payload types {:?})",
            media.connection_address, media.media_port, media.payload_types
        );
    }
    hold(account.expire);
    call.hang_up()?;
    registration.release()?;
    Ok(())
}

fn serve(bind: &str) -> Result<(), AppError> {
    let socket = UdpSocket::bind(parse_addr(bind)?)?;
    info!("listening on {}", socket.local_addr()?);

    let mut buf = vec![0u8; 65_535];
    loop {
        let (len, peer) = socket.recv_from(&mut buf)?;
        match std::str::from_utf8(&buf[..len]).map_err(|e| e.to_string()) {
            Ok(text) => match summarize(text) {
                Ok(line) => info!("{peer}: {line}"),
                Err(e) => warn!("{peer}: undecodable message: {e}"),
            },
            Err(e) => warn!("{peer}: non-UTF-8 datagram: {e}"),
        }
    }
}

/// One log line for an inbound message: start line essentials plus Call-ID.
fn summarize(text: &str) -> Result<String, SipError> {
    let (head, headers) = match parse_message(text)? {
        Message::Request(req) => (format!("{} {}", req.method, req.uri), req.headers),
        Message::Response(resp) => {
            let method = resp
                .method()
                .map(|m| m.to_string())
                .unwrap_or_else(|| "?".into());
            (
                format!("{} {} ({method})", resp.status_code, resp.reason),
                resp.headers,
            )
        }
    };
    Ok(format!(
        "{head} Call-ID {}",
        headers.call_id().unwrap_or("-")
    ))
}

fn parse_addr(value: &str) -> Result<SocketAddr, AppError> {
    value.parse().map_err(|source| AppError::Address {
        value: value.into(),
        source,
    })
}
