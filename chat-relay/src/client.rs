//! Line-mode terminal client.
//!
//! Prints whatever the relay sends and forwards each stdin line verbatim, so
//! directives like `\join rust` are typed exactly as the server expects them.

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::cli::ClientArgs;

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut reader, mut writer) = establish_connection(&args).await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    let mut incoming = Vec::new();

    run_client_loop(&mut reader, &mut writer, &mut stdin, &mut input, &mut incoming).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(
    args: &ClientArgs,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to connect to {}:{}", args.host, args.port))?;

    info!("connected to {}:{}", args.host, args.port);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

async fn run_client_loop(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
    incoming: &mut Vec<u8>,
) -> Result<()> {
    loop {
        select! {
            bytes_read = reader.read_until(b'\n', incoming) => {
                if !handle_server_line(bytes_read, incoming).await? {
                    break;
                }
                incoming.clear();
            }
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, writer).await? {
                    break;
                }
                input.clear();
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

/// Relayed chat is passed through as raw bytes; it need not be UTF-8.
async fn handle_server_line(bytes_read: io::Result<usize>, line: &[u8]) -> Result<bool> {
    if bytes_read? == 0 {
        write_stdout(b"Server disconnected. Bye bye\n").await?;
        return Ok(false);
    }

    write_stdout(line).await?;
    Ok(true)
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    if bytes_read? == 0 {
        return Ok(false);
    }

    if input.trim_end_matches(['\r', '\n']).is_empty() {
        return Ok(true);
    }

    writer
        .write_all(input.as_bytes())
        .await
        .context("failed to send line to relay")?;
    if !input.ends_with('\n') {
        writer.write_all(b"\n").await?;
    }
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_stdout(bytes: &[u8]) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(bytes).await?;
    stdout.flush().await
}
