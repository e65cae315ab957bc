use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use predicates::prelude::*;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader, Lines};
use tokio::process::{Child, ChildStdout};

struct Fixture {
    cert: PathBuf,
    key: PathBuf,
    ca: PathBuf,
    tempdir: TempDir,
}

impl Fixture {
    fn setup() -> anyhow::Result<Self> {
        let tempdir = TempDir::new()?;

        let ca_key = KeyPair::generate()?;
        let mut ca_params = CertificateParams::new(Vec::<String>::new())?;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "tlsbridge test CA");
        let ca_cert = ca_params.self_signed(&ca_key)?;

        let server_key = KeyPair::generate()?;
        let server_params =
            CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])?;
        let server_cert = server_params.signed_by(&server_key, &ca_cert, &ca_key)?;

        let cert = tempdir.child("server.crt");
        cert.write_str(&server_cert.pem())?;
        let key = tempdir.child("server.key");
        key.write_str(&server_key.serialize_pem())?;
        let ca = tempdir.child("ca.pem");
        ca.write_str(&ca_cert.pem())?;

        Ok(Self {
            cert: cert.to_path_buf(),
            key: key.to_path_buf(),
            ca: ca.to_path_buf(),
            tempdir,
        })
    }

    fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(assert_cmd::cargo::cargo_bin("tlsbridge"));
        cmd.env("RUST_LOG", "tlsbridge_network=debug")
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        cmd
    }

    fn start_server(&self) -> anyhow::Result<Child> {
        let mut cmd = self.command();
        cmd.arg("serve")
            .arg("--address")
            .arg("127.0.0.1:0")
            .arg("--cert")
            .arg(&self.cert)
            .arg("--key")
            .arg(&self.key)
            .stdin(Stdio::null());

        Ok(cmd.spawn()?)
    }
}

/// Read the next line of output, failing after a few seconds.
async fn next_line(lines: &mut Lines<BufReader<ChildStdout>>) -> anyhow::Result<String> {
    tokio::time::timeout(Duration::from_secs(10), lines.next_line())
        .await??
        .ok_or(anyhow::anyhow!("unexpected end of output"))
}

/// Wait for the server to report the address it listens on.
async fn wait_for_listening_addr(
    lines: &mut Lines<BufReader<ChildStdout>>,
) -> anyhow::Result<String> {
    let line = next_line(lines).await?;
    let addr = line
        .strip_prefix("Listening on ")
        .ok_or(anyhow::anyhow!("unexpected output: {line}"))?;

    Ok(addr.to_string())
}

#[test]
fn help() -> anyhow::Result<()> {
    Command::cargo_bin("tlsbridge")?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("connect"));

    Ok(())
}

#[test]
fn no_command() -> anyhow::Result<()> {
    Command::cargo_bin("tlsbridge")?
        .assert()
        .failure()
        .stderr(predicate::str::contains("ERROR:"));

    Ok(())
}

#[test]
fn missing_credentials() -> anyhow::Result<()> {
    let fixture = Fixture::setup()?;
    Command::cargo_bin("tlsbridge")?
        .arg("serve")
        .arg("--address")
        .arg("127.0.0.1:0")
        .arg("--cert")
        .arg(fixture.tempdir.path().join("missing.crt"))
        .arg("--key")
        .arg(&fixture.key)
        .assert()
        .failure()
        .stderr(predicate::str::contains("ERROR:"))
        .stderr(predicate::str::contains("missing.crt"));

    Ok(())
}

#[test]
fn invalid_config() -> anyhow::Result<()> {
    let fixture = Fixture::setup()?;
    let config = fixture.tempdir.child("bridge.toml");
    config.write_str(
        r#"
        [server]
        address = "127.0.0.1:0"
        cert = "server.crt"
        key = "server.key"

        [client]
        address = "127.0.0.1:9443"
        "#,
    )?;

    Command::cargo_bin("tlsbridge")?
        .arg("--config")
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("bridge.toml"));

    Ok(())
}

#[tokio::test]
async fn client_sends_lines_to_server() -> anyhow::Result<()> {
    let fixture = Fixture::setup()?;

    let mut server = fixture.start_server()?;
    let mut server_out = BufReader::new(
        server
            .stdout
            .take()
            .ok_or(anyhow::anyhow!("no server stdout"))?,
    )
    .lines();
    let addr = wait_for_listening_addr(&mut server_out).await?;

    let mut client = fixture
        .command()
        .arg("--kind")
        .arg("greeting")
        .arg("connect")
        .arg("--address")
        .arg(&addr)
        .arg("--trust")
        .arg(&fixture.ca)
        .stdin(Stdio::piped())
        .spawn()?;
    let mut client_in = client
        .stdin
        .take()
        .ok_or(anyhow::anyhow!("no client stdin"))?;
    client_in.write_all(b"hello\nworld\n").await?;
    client_in.flush().await?;

    assert_eq!("greeting\thello", next_line(&mut server_out).await?);
    assert_eq!("greeting\tworld", next_line(&mut server_out).await?);

    Ok(())
}

#[tokio::test]
async fn server_from_config_file() -> anyhow::Result<()> {
    let fixture = Fixture::setup()?;
    let server_config = fixture.tempdir.child("server.toml");
    server_config.write_str(
        r#"
        [server]
        address = "127.0.0.1:0"
        cert = "server.crt"
        key = "server.key"
        "#,
    )?;

    let mut server = fixture
        .command()
        .arg("--config")
        .arg(server_config.path())
        .stdin(Stdio::null())
        .spawn()?;
    let mut server_out = BufReader::new(
        server
            .stdout
            .take()
            .ok_or(anyhow::anyhow!("no server stdout"))?,
    )
    .lines();
    let addr = wait_for_listening_addr(&mut server_out).await?;

    let client_config = fixture.tempdir.child("client.toml");
    client_config.write_str(&format!(
        r#"
        [client]
        address = "{addr}"
        trust = "ca.pem"
        "#
    ))?;
    let mut client = fixture
        .command()
        .arg("--config")
        .arg(client_config.path())
        .stdin(Stdio::piped())
        .spawn()?;
    let mut client_in = client
        .stdin
        .take()
        .ok_or(anyhow::anyhow!("no client stdin"))?;
    client_in.write_all(b"configured\n").await?;
    client_in.flush().await?;

    assert_eq!("text\tconfigured", next_line(&mut server_out).await?);

    Ok(())
}
