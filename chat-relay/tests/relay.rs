use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result, anyhow};
use chat_relay::{
    config::RelayConfig,
    protocol::{DEFAULT_GREETING, NAME_TAKEN_REPLY, banner},
    reactor::Relay,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::oneshot,
    task::JoinHandle,
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(2);
const SILENCE: Duration = Duration::from_millis(300);

struct TestRelay {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<Result<()>>,
}

impl TestRelay {
    async fn start() -> Result<Self> {
        let config = RelayConfig {
            listen: "127.0.0.1:0".parse()?,
            idle_timeout_ms: 50,
            ..RelayConfig::default()
        };
        let relay = Relay::bind(config).await?;
        let addr = relay.local_addr()?;

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(relay.run_until(async move {
            let _ = shutdown_rx.await;
        }));

        Ok(Self {
            addr,
            shutdown,
            server,
        })
    }

    async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.server.await??;
        Ok(())
    }
}

struct Peer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Peer {
    /// Connects and consumes the welcome banner.
    async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        let mut peer = Self {
            reader: BufReader::new(reader),
            writer,
        };

        let mut received = String::new();
        for _ in 0..3 {
            received.push_str(&peer.read_line().await?.context("banner cut short")?);
        }
        assert_eq!(received, banner(DEFAULT_GREETING));
        Ok(peer)
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Reads one line as bytes, terminator included.
    async fn expect_raw_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        let bytes = timeout(READ_TIMEOUT, self.reader.read_until(b'\n', &mut line))
            .await
            .map_err(|_| anyhow!("timed out waiting for a line"))??;
        if bytes == 0 {
            return Err(anyhow!("connection closed"));
        }
        Ok(line)
    }

    async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let bytes = timeout(READ_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .map_err(|_| anyhow!("timed out waiting for a line"))??;
        Ok((bytes > 0).then_some(line))
    }

    async fn expect_line(&mut self) -> Result<String> {
        self.read_line().await?.context("connection closed")
    }

    async fn expect_silence(&mut self) -> Result<()> {
        let mut line = String::new();
        match timeout(SILENCE, self.reader.read_line(&mut line)).await {
            Err(_) => Ok(()),
            Ok(result) => Err(anyhow!("expected silence, got {result:?}: {line:?}")),
        }
    }

    /// Round trip that proves the relay has handled everything sent before
    /// it: renaming onto a name held by someone else always earns a reply.
    async fn sync(&mut self, taken_name: &str) -> Result<()> {
        self.send(&format!("\\setusername {taken_name}")).await?;
        assert_eq!(self.expect_line().await?, NAME_TAKEN_REPLY);
        Ok(())
    }
}

#[tokio::test]
async fn channel_chat_reaches_only_other_members() -> Result<()> {
    let relay = TestRelay::start().await?;

    let mut a = Peer::connect(relay.addr).await?;
    let mut b = Peer::connect(relay.addr).await?;
    let mut c = Peer::connect(relay.addr).await?;

    a.send("\\setusername A").await?;
    a.send("\\join x").await?;
    a.sync("user3").await?;
    b.send("\\setusername B").await?;
    b.send("\\join x").await?;
    b.sync("user3").await?;

    a.send("hi").await?;
    assert_eq!(b.expect_line().await?, "A> hi\n");
    c.expect_silence().await?;
    a.expect_silence().await?;

    // C is in no channel: its chat goes nowhere and it is not told.
    c.send("hello?").await?;
    c.sync("A").await?;
    a.expect_silence().await?;
    b.expect_silence().await?;

    drop(b);
    a.send("alone now").await?;
    a.sync("user3").await?;
    c.expect_silence().await?;

    relay.stop().await
}

#[tokio::test]
async fn rename_collision_is_rejected_with_literal_reply() -> Result<()> {
    let relay = TestRelay::start().await?;

    let mut a = Peer::connect(relay.addr).await?;
    let mut b = Peer::connect(relay.addr).await?;
    let mut c = Peer::connect(relay.addr).await?;

    a.send("\\setusername user3").await?;
    assert_eq!(a.expect_line().await?, "Username already exists\n");

    // A kept its default name: C can still address it in a channel.
    a.send("\\join room").await?;
    c.send("\\join room").await?;
    c.sync("user2").await?;
    a.send("still user1").await?;
    assert_eq!(c.expect_line().await?, "user1> still user1\n");
    b.expect_silence().await?;

    relay.stop().await
}

#[tokio::test]
async fn repeated_rename_to_same_name_is_harmless() -> Result<()> {
    let relay = TestRelay::start().await?;

    let mut a = Peer::connect(relay.addr).await?;
    let mut b = Peer::connect(relay.addr).await?;

    a.send("\\setusername bob").await?;
    a.send("\\setusername bob").await?;
    a.sync("user2").await?;
    a.expect_silence().await?;

    b.sync("bob").await?;

    a.send("\\join lobby").await?;
    b.send("\\join lobby").await?;
    b.sync("bob").await?;
    a.send("it's me").await?;
    assert_eq!(b.expect_line().await?, "bob> it's me\n");

    relay.stop().await
}

#[tokio::test]
async fn exit_closes_connection_and_frees_name() -> Result<()> {
    let relay = TestRelay::start().await?;

    let mut a = Peer::connect(relay.addr).await?;
    let mut b = Peer::connect(relay.addr).await?;

    a.send("\\setusername alice").await?;
    a.send("\\join lobby").await?;
    a.sync("user2").await?;
    b.send("\\join lobby").await?;
    b.sync("alice").await?;
    a.send("\\exit").await?;
    assert_eq!(a.read_line().await?, None);

    // The name is free again and nobody hears from alice.
    b.send("\\setusername alice").await?;
    b.send("anyone?").await?;
    b.expect_silence().await?;

    let mut c = Peer::connect(relay.addr).await?;
    c.sync("alice").await?;

    relay.stop().await
}

#[tokio::test]
async fn churn_leaves_survivors_connected() -> Result<()> {
    let relay = TestRelay::start().await?;

    let _witness = Peer::connect(relay.addr).await?;
    let mut anchor = Peer::connect(relay.addr).await?;
    anchor.send("\\setusername anchor").await?;
    anchor.send("\\join hub").await?;
    anchor.sync("user1").await?;

    for round in 0..10 {
        let mut transient = Vec::new();
        for _ in 0..5 {
            transient.push(Peer::connect(relay.addr).await?);
        }
        let mut listener = Peer::connect(relay.addr).await?;
        listener.send("\\join hub").await?;
        listener.sync("anchor").await?;
        drop(transient);

        anchor.send(&format!("round {round}")).await?;
        assert_eq!(listener.expect_line().await?, format!("anchor> round {round}\n"));
        listener.send("\\exit").await?;
        assert_eq!(listener.read_line().await?, None);
    }

    relay.stop().await
}

#[tokio::test]
async fn chat_bytes_pass_through_unchanged() -> Result<()> {
    let relay = TestRelay::start().await?;

    let mut a = Peer::connect(relay.addr).await?;
    let mut b = Peer::connect(relay.addr).await?;
    a.send("\\join x").await?;
    a.sync("user2").await?;
    b.send("\\join x").await?;
    b.sync("user1").await?;

    a.send_raw(b"caf\xe9\r\n").await?;
    a.send("after").await?;
    assert_eq!(b.expect_raw_line().await?, b"user1> caf\xe9\r\n");
    assert_eq!(b.expect_raw_line().await?, b"user1> after\n");

    // The sender is still connected.
    a.sync("user2").await?;

    relay.stop().await
}

#[tokio::test]
async fn long_lines_arrive_in_full() -> Result<()> {
    let relay = TestRelay::start().await?;

    let mut a = Peer::connect(relay.addr).await?;
    let mut b = Peer::connect(relay.addr).await?;
    a.send("\\join x").await?;
    a.sync("user2").await?;
    b.send("\\join x").await?;
    b.sync("user1").await?;

    let long = "z".repeat(2000);
    a.send(&long).await?;

    let mut relayed = 0;
    while relayed < long.len() {
        let line = b.expect_raw_line().await?;
        let body = line
            .strip_prefix(b"user1> ")
            .and_then(|rest| rest.strip_suffix(b"\n"))
            .context("relayed chunk is not a chat line")?;
        assert!(!body.is_empty());
        assert!(body.iter().all(|byte| *byte == b'z'));
        relayed += body.len();
    }
    assert_eq!(relayed, long.len());
    b.expect_silence().await?;

    relay.stop().await
}
