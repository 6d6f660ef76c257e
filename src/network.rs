use crate::errors::{FailoverError, FailoverResult};
use log::debug;
use std::io::{ErrorKind, Read};
use std::net::IpAddr;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Result of an `add address` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Applied,
    /// The kernel already had the address bound
    AlreadyExists,
    Failed(String),
}

/// Result of a `delete address` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Applied,
    /// The address was not bound to the interface
    NotFound,
    Failed(String),
}

/// Result of any other mutating request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Applied,
    /// The executor has no way to perform this operation on this host
    Unsupported,
    Failed(String),
}

/// Link state as reported by `show link`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStatus {
    pub exists: bool,
    pub admin_up: bool,
}

/// Address and link operations against one named interface.
///
/// Implementations classify the operating system's diagnostics into the outcome enums, so the
/// failover logic never has to look at error text.
#[cfg_attr(test, mockall::automock)]
pub trait AddressExecutor {
    /// Addresses currently bound to the interface, with prefix
    fn list_addresses(&self, iface: &str) -> FailoverResult<Vec<String>>;

    fn add_address(&self, iface: &str, cidr: &str) -> AddOutcome;

    fn delete_address(&self, iface: &str, cidr: &str) -> DeleteOutcome;

    /// Remove every address from the interface
    fn flush_addresses(&self, iface: &str) -> CommandOutcome;

    fn show_link(&self, iface: &str) -> LinkStatus;

    fn set_link_up(&self, iface: &str) -> CommandOutcome;

    /// Best-effort gratuitous announcement of a freshly bound address
    fn announce_address(&self, _iface: &str, _ip: IpAddr) -> CommandOutcome {
        CommandOutcome::Unsupported
    }
}

impl<E: AddressExecutor + ?Sized> AddressExecutor for &E {
    fn list_addresses(&self, iface: &str) -> FailoverResult<Vec<String>> {
        (**self).list_addresses(iface)
    }

    fn add_address(&self, iface: &str, cidr: &str) -> AddOutcome {
        (**self).add_address(iface, cidr)
    }

    fn delete_address(&self, iface: &str, cidr: &str) -> DeleteOutcome {
        (**self).delete_address(iface, cidr)
    }

    fn flush_addresses(&self, iface: &str) -> CommandOutcome {
        (**self).flush_addresses(iface)
    }

    fn show_link(&self, iface: &str) -> LinkStatus {
        (**self).show_link(iface)
    }

    fn set_link_up(&self, iface: &str) -> CommandOutcome {
        (**self).set_link_up(iface)
    }

    fn announce_address(&self, iface: &str, ip: IpAddr) -> CommandOutcome {
        (**self).announce_address(iface, ip)
    }
}

/// Captured output of an external command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run a command, killing it if it has not exited within `timeout`
pub fn run_command(program: &str, args: &[&str], timeout: Duration) -> FailoverResult<CommandOutput> {
    let cmd_str = format!("{} {}", program, args.join(" "));
    debug!("CMD: {}", cmd_str);

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // Drain both pipes concurrently so a chatty child cannot block on a full pipe
    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(FailoverError::CommandTimeout(cmd_str));
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    };

    let output = CommandOutput {
        success: status.success(),
        stdout: stdout_reader.join().unwrap_or_default(),
        stderr: stderr_reader.join().unwrap_or_default(),
    };

    if !output.success {
        debug!("RC={:?}, ERR={}", status.code(), output.stderr.trim());
    }

    Ok(output)
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    })
}

/// Executor backed by iproute2 (`ip`) and `arping`
#[derive(Debug, Clone)]
pub struct IpCommandExecutor {
    command_timeout: Duration,
    announce_count: u8,
}

impl IpCommandExecutor {
    pub fn new(command_timeout: Duration, announce_count: u8) -> Self {
        Self {
            command_timeout,
            announce_count,
        }
    }

    fn ip(&self, args: &[&str]) -> FailoverResult<CommandOutput> {
        run_command("ip", args, self.command_timeout)
    }
}

impl AddressExecutor for IpCommandExecutor {
    fn list_addresses(&self, iface: &str) -> FailoverResult<Vec<String>> {
        let output = self.ip(&["-o", "addr", "show", "dev", iface])?;
        if !output.success {
            return Err(FailoverError::CommandExecution(format!(
                "ip addr show dev {}: {}",
                iface,
                output.stderr.trim()
            )));
        }

        let addresses = parse_address_list(&output.stdout);
        debug!("Addresses on {}: {:?}", iface, addresses);
        Ok(addresses)
    }

    fn add_address(&self, iface: &str, cidr: &str) -> AddOutcome {
        match self.ip(&["addr", "add", cidr, "dev", iface]) {
            Ok(out) if out.success => AddOutcome::Applied,
            Ok(out) => classify_add_error(&out.stderr),
            Err(e) => AddOutcome::Failed(e.to_string()),
        }
    }

    fn delete_address(&self, iface: &str, cidr: &str) -> DeleteOutcome {
        match self.ip(&["addr", "del", cidr, "dev", iface]) {
            Ok(out) if out.success => DeleteOutcome::Applied,
            Ok(out) => classify_delete_error(&out.stderr),
            Err(e) => DeleteOutcome::Failed(e.to_string()),
        }
    }

    fn flush_addresses(&self, iface: &str) -> CommandOutcome {
        match self.ip(&["addr", "flush", "dev", iface]) {
            Ok(out) if out.success => CommandOutcome::Applied,
            Ok(out) => CommandOutcome::Failed(out.stderr.trim().to_string()),
            Err(e) => CommandOutcome::Failed(e.to_string()),
        }
    }

    fn show_link(&self, iface: &str) -> LinkStatus {
        match self.ip(&["link", "show", "dev", iface]) {
            Ok(out) if out.success => LinkStatus {
                exists: true,
                admin_up: link_flags_up(&out.stdout),
            },
            _ => LinkStatus::default(),
        }
    }

    fn set_link_up(&self, iface: &str) -> CommandOutcome {
        match self.ip(&["link", "set", "dev", iface, "up"]) {
            Ok(out) if out.success => CommandOutcome::Applied,
            Ok(out) => CommandOutcome::Failed(out.stderr.trim().to_string()),
            Err(e) => CommandOutcome::Failed(e.to_string()),
        }
    }

    fn announce_address(&self, iface: &str, ip: IpAddr) -> CommandOutcome {
        if ip.is_ipv6() {
            return CommandOutcome::Unsupported;
        }

        let count = self.announce_count.to_string();
        let ip = ip.to_string();
        let mut last_error = String::new();

        // iputils arping takes -U, other builds only understand -A
        for mode in ["-U", "-A"] {
            let args = ["-c", count.as_str(), mode, "-I", iface, ip.as_str()];
            match run_command("arping", &args, self.command_timeout) {
                Ok(out) if out.success => return CommandOutcome::Applied,
                Ok(out) => last_error = out.stderr.trim().to_string(),
                Err(FailoverError::IOError(e)) if e.kind() == ErrorKind::NotFound => {
                    return CommandOutcome::Unsupported;
                }
                Err(e) => last_error = e.to_string(),
            }
        }

        CommandOutcome::Failed(last_error)
    }
}

/// Extract `addr/prefix` tokens from `ip -o addr show` output
pub fn parse_address_list(stdout: &str) -> Vec<String> {
    let mut addresses = Vec::new();

    for line in stdout.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if let Some(index) = parts.iter().position(|&x| x == "inet" || x == "inet6") {
            if let Some(addr) = parts.get(index + 1) {
                addresses.push(addr.to_string());
            }
        }
    }

    addresses
}

/// Whether the `<...>` flag block of `ip link show` contains `UP`
pub fn link_flags_up(stdout: &str) -> bool {
    stdout
        .lines()
        .next()
        .and_then(|line| {
            let start = line.find('<')?;
            let end = line[start..].find('>')? + start;
            Some(line[start + 1..end].split(',').any(|flag| flag == "UP"))
        })
        .unwrap_or(false)
}

fn classify_add_error(stderr: &str) -> AddOutcome {
    if stderr.contains("File exists") {
        AddOutcome::AlreadyExists
    } else {
        AddOutcome::Failed(stderr.trim().to_string())
    }
}

fn classify_delete_error(stderr: &str) -> DeleteOutcome {
    if stderr.contains("Cannot assign requested address") {
        DeleteOutcome::NotFound
    } else {
        DeleteOutcome::Failed(stderr.trim().to_string())
    }
}

/// Get available network interfaces
pub fn list_interfaces() -> Vec<String> {
    match run_command("ip", &["-o", "link", "show"], Duration::from_secs(5)) {
        Ok(o) => o
            .stdout
            .lines()
            .filter_map(|line| line.split(": ").nth(1))
            .map(|name| name.split('@').next().unwrap_or(name).to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}
