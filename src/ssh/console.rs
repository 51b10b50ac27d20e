//! C10 — the interactive command console served over the `session` channel.
//!
//! A minimal line-oriented terminal: the client's SSH client is expected to
//! be in raw mode, so this does its own local echo and backspace handling
//! rather than relying on a pty layer. Each command prints a one-line
//! result and the prompt is re-issued; `quit`/`exit`/`close` ends the
//! channel.

use std::sync::Arc;

use russh::server::Msg;
use russh::Channel;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::daemon::Daemon;
use crate::http::{Direction, Rewrite};
use crate::router::Endpoint;
use crate::services::Service;
use crate::ssh::session::Session;

const PROMPT: &str = "\r\n> ";
const BACKSPACE: u8 = 0x7f;
const CARRIAGE_RETURN: u8 = b'\r';
const NEWLINE: u8 = b'\n';

pub struct Console {
    daemon: Arc<Daemon>,
    session: Arc<Session>,
}

impl Console {
    pub fn new(daemon: Arc<Daemon>, session: Arc<Session>) -> Self {
        Self { daemon, session }
    }

    pub async fn run(self, channel: Channel<Msg>) {
        let mut io = channel.into_stream();
        let mut pump = self.session.take_msg_receiver().await;
        let mut exec = self.session.take_exec_receiver().await;

        if io.write_all(self.banner().as_bytes()).await.is_err() {
            return;
        }
        if io.write_all(PROMPT.as_bytes()).await.is_err() {
            return;
        }

        let mut line = Vec::new();
        let mut buf = [0u8; 1024];

        loop {
            tokio::select! {
                read = io.read(&mut buf) => {
                    match read {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if !self.handle_input(&mut io, &mut line, &buf[..n]).await {
                                break;
                            }
                        }
                    }
                }
                Some(msg) = async {
                    match pump.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    if io.write_all(format!("\r\n{msg}{PROMPT}").as_bytes()).await.is_err() {
                        break;
                    }
                }
                // Commands queued by an `exec` channel request run exactly
                // as if the user had typed them.
                Some(command) = async {
                    match exec.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    let (output, keep_going) = self.dispatch(&command).await;
                    let framed = format!("\r\n{output}{PROMPT}");
                    if io.write_all(framed.as_bytes()).await.is_err() || !keep_going {
                        break;
                    }
                }
            }
        }
    }

    fn banner(&self) -> String {
        format!(
            "*** connected as {} ***\r\n*** type 'host list' or 'access' to get started ***",
            self.session.fqdn
        )
    }

    /// Returns `false` when the connection should close.
    async fn handle_input<W: AsyncWriteExt + Unpin>(
        &self,
        io: &mut W,
        line: &mut Vec<u8>,
        chunk: &[u8],
    ) -> bool {
        for &b in chunk {
            match b {
                CARRIAGE_RETURN | NEWLINE => {
                    let command = String::from_utf8_lossy(line).trim().to_string();
                    line.clear();
                    if command.is_empty() {
                        let _ = io.write_all(PROMPT.as_bytes()).await;
                        continue;
                    }
                    let (output, keep_going) = self.dispatch(&command).await;
                    let framed = format!("\r\n{output}{PROMPT}");
                    if io.write_all(framed.as_bytes()).await.is_err() || !keep_going {
                        return false;
                    }
                }
                BACKSPACE => {
                    if line.pop().is_some() {
                        let _ = io.write_all(b"\x08 \x08").await;
                    }
                }
                _ => {
                    line.push(b);
                    let _ = io.write_all(&[b]).await;
                }
            }
        }
        true
    }

    /// Returns the response text and whether the channel should stay open.
    /// Any dispatched command counts as console activity, poking the idle
    /// timer the same way the original's select loop does after every
    /// command it processes.
    async fn dispatch(&self, command: &str) -> (String, bool) {
        self.session.poke_idle();
        let parts: Vec<&str> = command.split_whitespace().collect();
        match parts.as_slice() {
            ["quit"] | ["exit"] | ["close"] => ("*** closing ***".to_string(), false),
            ["whoami"] => (self.whoami(), true),
            ["version"] => ("tunnelmux".to_string(), true),
            ["firsttime"] => (self.firsttime(), true),
            ["access"] => (self.access(), true),
            ["session", "forwards"] => (self.session_forwards(), true),
            ["session", "autossh"] => (self.session_autossh(), true),
            ["session", "unitfile"] => (self.session_unitfile(), true),
            ["host", "list"] => (self.host_list(), true),
            ["host", "add", name] => (self.host_add(name).await, true),
            ["host", "remove", name] => (self.host_remove(name).await, true),
            ["host", "remove", "all"] => (self.host_remove_all().await, true),
            ["http", "rewrite", "add", from, to] => (self.rewrite_add(from, to).await, true),
            ["http", "rewrite", "list"] => (self.rewrite_list(), true),
            ["http", "rewrite", "remove", from] => (self.rewrite_remove(from).await, true),
            _ => (format!("*** unknown command: {command} ***"), true),
        }
    }

    fn whoami(&self) -> String {
        format!(
            "{}\r\nsha256: {}\r\nkey: {}",
            self.session.fqdn,
            self.session.key_extensions.fingerprint_sha256,
            self.session.key_extensions.openssh_authorized_key,
        )
    }

    fn firsttime(&self) -> String {
        format!(
            "tunnelmux\r\n\
             tunnelmux allows users to access services that are otherwise inaccessible from the internet.\r\n\
             Just like ngrok or argo tunnels, a device or service connects to tunnelmux which in turn muxes\r\n\
             requests back from the internet.\r\n\
             \r\n\
             Basic example:\r\n\
             Access the command line and a webservice of a remotely deployed device:\r\n\
             \r\n\
             From the device, connect using `-R` parameters which tells ssh to forward ports.\r\n\
             \r\n\
             \x20\x20ssh -R80:localhost:80 -R22:localhost:22 {hostname}\r\n\
             \r\n\
             That's it, the device's webservice and ssh daemon are now accessible from the internet.",
            hostname = self.daemon.services.hostname(),
        )
    }

    /// Ported from the original `access` command: per service group, list
    /// every configured port that is actually forwarded, rendering the
    /// default port without the `:port` suffix and SSH access as an
    /// `ssh -J` jump rather than a bare URL, and repeating each line for
    /// every named alias this session owns.
    fn access(&self) -> String {
        let forwarded = self.session.declared_ports();
        let named = self.daemon.router.names(&self.session.fqdn);
        let fqdn = self.session.fqdn.as_str();
        let hostname = self.daemon.services.hostname();

        let mut lines = Vec::new();
        if forwarded.is_empty() {
            lines.push("You have zero forwarded ports, have a look in the ssh manual: man ssh.".to_string());
            lines.push("You will be looking for the -R parameter.".to_string());
        } else {
            lines.push(format!(
                "Based on currently forwarded ports {}, your services will be available at:",
                join_ports(&forwarded)
            ));
        }

        lines.push(String::new());
        lines.push(access_group(
            "HTTP",
            self.daemon.services.ports(Service::Http),
            &forwarded,
            fqdn,
            &named,
            |host, port| {
                if port == 80 { format!("http://{host}/") } else { format!("http://{host}:{port}/") }
            },
            "No HTTP services found, add some by appending `-R80:localhost:80` when connecting.",
        ));

        lines.push(String::new());
        lines.push(access_group(
            "HTTPS",
            self.daemon.services.ports(Service::Https),
            &forwarded,
            fqdn,
            &named,
            |host, port| {
                if port == 443 { format!("https://{host}/") } else { format!("https://{host}:{port}/") }
            },
            "No HTTPS services found, add some by appending `-R443:localhost:443` when connecting.",
        ));

        lines.push(String::new());
        lines.push(access_group(
            "SSH",
            self.daemon.services.ports(Service::Ssh),
            &forwarded,
            fqdn,
            &named,
            |host, port| {
                if port == 22 {
                    format!("ssh -J {hostname} {host}")
                } else {
                    format!("ssh -p{port} -J {hostname}:{port} {host}")
                }
            },
            "No SSH services found, add some by appending `-R22:localhost:22` when connecting.",
        ));

        lines.join("\r\n")
    }

    fn session_autossh(&self) -> String {
        let ports = self.session.declared_ports();
        let mut lines = vec![format!("# autossh template based on ports {}", join_ports(&ports))];
        lines.push("autossh -M 0 -f \\".to_string());
        lines.push("  -o \"ExitOnForwardFailure yes\" \\".to_string());
        lines.push("  -o \"ServerAliveInterval 30\" \\".to_string());
        lines.push("  -o \"ServerAliveCountMax 3\" \\".to_string());
        for port in &ports {
            lines.push(format!("  -R {port}:localhost:{port} \\"));
        }
        lines.push(format!("  {} -N", self.daemon.services.hostname()));
        lines.push(String::new());
        lines.push("# for this to work, autossh needs access to the same keys and known_hosts as you had.".to_string());
        lines.push("# if debugging is needed, remove the `-f` parameter which will keep autossh in the foreground.".to_string());
        lines.join("\r\n")
    }

    fn session_unitfile(&self) -> String {
        let ports = self.session.declared_ports();
        let hostname = self.daemon.services.hostname();
        let mut lines = vec![
            "systemd user service unit".to_string(),
            "Ensure you have lingering turned on, and the directories setup correctly:".to_string(),
            "  $ mkdir -p ~/.config/systemd/user/".to_string(),
            "  $ sudo loginctl enable-linger $USER".to_string(),
            String::new(),
            "Put this file into ~/.config/systemd/user/tunnelmux.service".to_string(),
            "[Unit]\r\nDescription=tunnelmux tunnel\r\nStartLimitIntervalSec=0\r\nAfter=network.target\r\n\r\n[Service]\r\nRestart=always\r\nRestartSec=1m".to_string(),
            "ExecStart=ssh \\".to_string(),
            "  -o \"ExitOnForwardFailure yes\" \\".to_string(),
            "  -o \"ServerAliveInterval 30\" \\".to_string(),
            "  -o \"ServerAliveCountMax 3\" \\".to_string(),
        ];
        for port in &ports {
            lines.push(format!("  -R {port}:localhost:{port} \\"));
        }
        lines.push(format!("  {hostname} -N"));
        lines.push(String::new());
        lines.push("[Install]\r\nWantedBy=default.target".to_string());
        lines.push(String::new());
        lines.push("You should now be able to start the service:".to_string());
        lines.push(" $ systemctl --user start tunnelmux.service".to_string());
        lines.push(String::new());
        lines.push("You can also enable the service at boot time:".to_string());
        lines.push(" $ systemctl --user enable tunnelmux.service".to_string());
        lines.join("\r\n")
    }

    fn session_forwards(&self) -> String {
        let ports = self.session.declared_ports();
        if ports.is_empty() {
            "*** no forwards registered yet ***".to_string()
        } else {
            ports.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ")
        }
    }

    fn host_list(&self) -> String {
        let names = self.daemon.router.names(&self.session.fqdn);
        if names.is_empty() {
            "*** no aliases registered ***".to_string()
        } else {
            names.join("\r\n")
        }
    }

    async fn host_add(&self, name: &str) -> String {
        match self.daemon.router.add_name(name, &self.session.fqdn).await {
            Ok(()) => format!("*** added alias {name} ***"),
            Err(e) => format!("*** could not add {name}: {e} ***"),
        }
    }

    async fn host_remove(&self, name: &str) -> String {
        match self.daemon.router.remove_name(name, &self.session.fqdn).await {
            Ok(()) => format!("*** removed alias {name} ***"),
            Err(e) => format!("*** could not remove {name}: {e} ***"),
        }
    }

    async fn host_remove_all(&self) -> String {
        let (removed, err) = self.daemon.router.remove_names(&self.session.fqdn).await;
        match err {
            Some(e) => format!("*** removed {} alias(es), then failed: {e} ***", removed.len()),
            None => format!("*** removed {} alias(es) ***", removed.len()),
        }
    }

    /// `http rewrite add <scheme://host:port> <scheme://port>` — the target
    /// side is always implicitly this session's own identity.
    async fn rewrite_add(&self, from: &str, to: &str) -> String {
        let from = match parse_direction(from) {
            Ok(d) => d,
            Err(e) => return format!("*** invalid source: {e} ***"),
        };
        let (to_scheme, to_port) = match parse_scheme_port(to) {
            Ok(v) => v,
            Err(e) => return format!("*** invalid target: {e} ***"),
        };
        if let Err(e) = self.validate_rewrite_source(&from) {
            return format!("*** unable to validate match: {e} ***");
        }

        let rewrite = Rewrite { from: from.clone(), to_scheme, to_port, owner: self.session.fqdn.clone() };
        match self.daemon.rewrites.add(rewrite) {
            Ok(()) => format!("*** rewriting {from} ***"),
            Err(e) => format!("*** could not add rewrite: {e} ***"),
        }
    }

    /// Ported from the original add-command's `validateURL`/`validateScheme`:
    /// the match host must resolve through the router to this session's own
    /// identity, or to a named alias this session owns — otherwise any
    /// session could install a rewrite that hijacks someone else's traffic.
    /// If the match port is one of the service table's known ports, its
    /// scheme must agree with that service.
    fn validate_rewrite_source(&self, from: &Direction) -> Result<(), String> {
        match self.daemon.router.find(&from.host) {
            None => {
                return Err(format!(
                    "host \"{}\" not found, add with `host add {}`",
                    from.host, from.host
                ))
            }
            Some(Endpoint::Named(route)) if route.owner != self.session.fqdn => {
                return Err(format!("this session does not own {}", from.host));
            }
            Some(Endpoint::Host(_)) if from.host != self.session.fqdn => {
                return Err("this session cannot add matches for other sessions' hostnames".to_string());
            }
            Some(_) => {}
        }

        if let Some(service) = self.daemon.services.service_for_port(from.port) {
            if service.as_str() != from.scheme {
                return Err(format!(
                    "port {} of match url will never encounter {} traffic, only {}",
                    from.port,
                    from.scheme,
                    service.as_str()
                ));
            }
        }

        validate_scheme(&from.scheme)
    }

    fn rewrite_list(&self) -> String {
        let rewrites = self.daemon.rewrites.list(&self.session.fqdn);
        if rewrites.is_empty() {
            "*** no rewrites registered ***".to_string()
        } else {
            rewrites
                .iter()
                .map(|r| format!("{} -> {}:{}", r.from, r.to_scheme, r.to_port))
                .collect::<Vec<_>>()
                .join("\r\n")
        }
    }

    async fn rewrite_remove(&self, from: &str) -> String {
        let from = match parse_direction(from) {
            Ok(d) => d,
            Err(e) => return format!("*** invalid source: {e} ***"),
        };
        match self.daemon.rewrites.remove(&from, &self.session.fqdn) {
            Ok(()) => format!("*** removed rewrite for {from} ***"),
            Err(e) => format!("*** could not remove rewrite: {e} ***"),
        }
    }
}

fn validate_scheme(scheme: &str) -> Result<(), String> {
    if scheme == "http" || scheme == "https" {
        Ok(())
    } else {
        Err("scheme is neither http nor https".to_string())
    }
}

/// Renders one service group of the `access` command: a header naming the
/// service's configured ports, then one access line per configured port
/// that is actually forwarded (for this session's own FQDN and every named
/// alias it owns), or the help text if none are forwarded yet.
fn access_group(
    label: &str,
    configured_ports: &[u16],
    forwarded: &[u16],
    fqdn: &str,
    named: &[String],
    render: impl Fn(&str, u16) -> String,
    help: &str,
) -> String {
    let mut lines = vec![format!("{label} ({})", join_ports(configured_ports))];
    let mut matched = false;
    for &port in configured_ports {
        if !forwarded.contains(&port) {
            continue;
        }
        matched = true;
        lines.push(render(fqdn, port));
        for alias in named {
            lines.push(render(alias, port));
        }
    }
    if !matched {
        lines.push(help.to_string());
    }
    lines.join("\r\n")
}

/// "80", "80 and 443", or "80, 443 and 8080" — mirrors the original's
/// `joinDigits` helper.
fn join_ports(ports: &[u16]) -> String {
    match ports {
        [] => String::new(),
        [only] => only.to_string(),
        [rest @ .., last] => format!(
            "{} and {last}",
            rest.iter().map(u16::to_string).collect::<Vec<_>>().join(", ")
        ),
    }
}

fn parse_direction(raw: &str) -> Result<Direction, String> {
    let (scheme, rest) = raw.split_once("://").ok_or("expected scheme://host:port")?;
    let (host, port) = rest.rsplit_once(':').ok_or("expected host:port")?;
    let port: u16 = port.parse().map_err(|_| "bad port")?;
    Ok(Direction::new(scheme, host, port))
}

fn parse_scheme_port(raw: &str) -> Result<(String, u16), String> {
    let (scheme, port) = raw.split_once(':').ok_or("expected scheme:port")?;
    let port: u16 = port.trim_start_matches('/').parse().map_err(|_| "bad port")?;
    Ok((scheme.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_direction() {
        let d = parse_direction("http://example.com:8080").unwrap();
        assert_eq!(d.host, "example.com");
        assert_eq!(d.port, 8080);
    }

    #[test]
    fn rejects_a_malformed_direction() {
        assert!(parse_direction("example.com").is_err());
    }
}
