use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("chat_relay");

    let (mut server_child, mut server_stdout) = spawn_server(&binary).await?;
    let port = read_server_port(&mut server_stdout).await?;

    // Drain further server logs in the background so the pipe never fills.
    let server_log_task = tokio::spawn(async move {
        drain_stdout(server_stdout).await;
    });

    // Connection order fixes the default names: user1, then user2.
    let mut first = spawn_client(&binary, port, "first").await?;
    let mut second = spawn_client(&binary, port, "second").await?;

    first.send_line("\\join lobby").await.context("first join")?;
    first.sync("user2").await?;
    second.send_line("\\join lobby").await.context("second join")?;
    second.sync("user1").await?;

    first
        .send_line("hello from the terminal")
        .await
        .context("first send line")?;
    let heard = read_line_expect(&mut second.stdout, "waiting for second to hear first").await?;
    assert_eq!(heard, "user1> hello from the terminal");

    // The second client leaves; the relay drops the connection.
    second.send_line("\\exit").await.context("second send exit")?;
    let goodbye = read_line_expect(&mut second.stdout, "waiting for disconnect notice").await?;
    assert_eq!(goodbye, "Server disconnected. Bye bye");
    ensure_success(&mut second.child, "second client").await?;

    // Closing stdin ends the first client.
    let ClientProcess {
        mut child, stdin, ..
    } = first;
    drop(stdin);
    ensure_success(&mut child, "first client").await?;

    // The relay runs until interrupted; terminate it manually.
    let _ = server_child.kill().await;
    let _ = server_child.wait().await;
    let _ = server_log_task.await;

    Ok(())
}

struct ClientProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ClientProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Renames onto a taken name and waits for the refusal, which proves the
    /// relay has processed every earlier line from this client.
    async fn sync(&mut self, taken_name: &str) -> Result<()> {
        self.send_line(&format!("\\setusername {taken_name}")).await?;
        let reply = read_line_expect(&mut self.stdout, "waiting for collision reply").await?;
        if reply != "Username already exists" {
            return Err(anyhow!("expected collision reply, got '{reply}'"));
        }
        Ok(())
    }
}

async fn spawn_server(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("server")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().context("failed to spawn server")?;
    let stdout = child
        .stdout
        .take()
        .context("server stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_server_port(reader: &mut BufReader<ChildStdout>) -> Result<u16> {
    let line = read_line(reader)
        .await?
        .context("server did not emit listening address")?;
    let trimmed = line.trim();
    let addr = trimmed
        .split_whitespace()
        .last()
        .context("unexpected server log format")?;
    let (_, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("server log missing socket: {trimmed}"))?;
    port.parse()
        .with_context(|| format!("server log has a bad port: {trimmed}"))
}

async fn spawn_client(binary: &Path, port: u16, label: &str) -> Result<ClientProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg("127.0.0.1")
        .arg(port.to_string())
        .env("RUST_LOG", "warn")
        .env("NO_COLOR", "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {label} client"))?;

    let stdin = child
        .stdin
        .take()
        .context("client stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("client stdout missing after spawn")?;

    let mut process = ClientProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    };

    let greeting = " Hello, Welcome in this chat ";
    let border = "=".repeat(greeting.len());
    let expected = [border.as_str(), greeting, border.as_str()];
    for want in expected {
        let got = read_line_expect(&mut process.stdout, "waiting for welcome banner").await?;
        if got != want {
            return Err(anyhow!("{label} expected banner line '{want}', got '{got}'"));
        }
    }

    Ok(process)
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let bytes_io = match timeout(READ_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    if bytes_io? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while let Ok(bytes) = reader.read_line(&mut buffer).await {
        if bytes == 0 {
            break;
        }
        buffer.clear();
    }
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = timeout(READ_TIMEOUT, child.wait())
        .await
        .map_err(|_| anyhow!("{name} did not exit"))?
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
