//! Integration tests for the agent binary.
mod common;

use std::{fs, net::UdpSocket, path::Path, time::Duration};

use common::{
    empty_temp_dir,
    run::{run_agent_output, spawn_agent},
};
use machinestats_agent::config::AgentConfig;
use pretty_assertions::assert_eq;

const AGENT_BIN: &str = "machinestatsd";

const MEMINFO: &str = "MemTotal:       32896100 kB
MemFree:          959580 kB
MemAvailable:   14431764 kB
";

const PROC_STAT: &str = "cpu  16237003 488024 7674741 943706235 1071665 0 1072139 0 0 0
cpu0 639241 21228 326322 39345419 43681 0 685277 0 0 0
ctxt 2840296354
btime 1700000000
processes 1903212
";

const NET_DEV: &str = "Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 16569742  243321    0    0    0     0          0         0 16569742  243321    0    0    0     0       0          0
";

const TCP: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:0277 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 24055 1 0000000000000000 100 0 0 10 0
";

const UDP: &str = "   sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode ref pointer drops
";

fn write_procfs(root: &Path) {
    fs::create_dir_all(root.join("net")).unwrap();
    fs::write(root.join("meminfo"), MEMINFO).unwrap();
    fs::write(root.join("stat"), PROC_STAT).unwrap();
    fs::write(root.join("net/dev"), NET_DEV).unwrap();
    fs::write(root.join("net/tcp"), TCP).unwrap();
    fs::write(root.join("net/udp"), UDP).unwrap();
}

#[test]
fn help() {
    let tmp_dir = empty_temp_dir("help").unwrap();
    let output = run_agent_output(AGENT_BIN, &["--help"], &tmp_dir).unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("--statsd-address"));
    assert!(stdout.contains("STATSD_INTERVAL"));
}

#[test]
fn args_bad_config_no_folder() -> anyhow::Result<()> {
    let tmp_dir = empty_temp_dir("args_bad_config_no_folder")?;
    let bad_conf = tmp_dir.join("nope").join("zzzzz.toml");

    let bad_conf_filename = bad_conf.to_str().unwrap();
    let output = run_agent_output(AGENT_BIN, &["--config", bad_conf_filename], &tmp_dir)?;
    assert!(
        !output.status.success(),
        "should fail because the config directory does not exist"
    );
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains(bad_conf_filename), "unexpected stderr: {stderr}");
    Ok(())
}

#[test]
fn args_bad_config_missing_file_no_default() -> anyhow::Result<()> {
    let tmp_dir = empty_temp_dir("args_bad_config_missing_file_no_default")?;
    let bad_conf = tmp_dir.join("zzzzz.toml");

    let bad_conf_filename = bad_conf.to_str().unwrap();
    let output = run_agent_output(
        AGENT_BIN,
        &["--config", bad_conf_filename, "--no-default-config"],
        &tmp_dir,
    )?;
    assert!(!output.status.success(), "should fail because the config does not exist");
    assert!(!bad_conf.exists(), "the default config should not be written");
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains(bad_conf_filename), "unexpected stderr: {stderr}");
    Ok(())
}

#[test]
fn args_regen_config() -> anyhow::Result<()> {
    let tmp_dir = tempfile::tempdir()?;
    let conf = tmp_dir.path().join("config.toml");
    fs::write(&conf, "poll_interval = \"10s\"\n")?;

    let conf_path_str = conf.to_str().unwrap();
    let output = run_agent_output(AGENT_BIN, &["--config", conf_path_str, "config", "regen"], tmp_dir.path())?;
    assert!(output.status.success(), "command should succeed");

    let content = fs::read_to_string(&conf)?;
    assert!(content.contains("[statsd]"));
    assert!(content.contains("[coturn]"));
    assert_eq!(AgentConfig::parse(&content)?, AgentConfig::default());
    Ok(())
}

#[test]
fn invalid_config_is_rejected() -> anyhow::Result<()> {
    let tmp_dir = tempfile::tempdir()?;
    let conf = tmp_dir.path().join("config.toml");
    fs::write(&conf, "poll_interval = 3000\n")?;

    let output = run_agent_output(AGENT_BIN, &["--config", conf.to_str().unwrap()], tmp_dir.path())?;
    assert!(!output.status.success());
    Ok(())
}

#[test]
fn sends_stats_to_statsd() -> anyhow::Result<()> {
    let tmp_dir = tempfile::tempdir()?;
    let procfs = tmp_dir.path().join("proc");
    write_procfs(&procfs);

    let statsd = UdpSocket::bind("127.0.0.1:0")?;
    statsd.set_read_timeout(Some(Duration::from_secs(10)))?;
    let statsd_addr = statsd.local_addr()?.to_string();

    let conf = tmp_dir.path().join("machinestatsd.toml");
    let _agent = spawn_agent(
        AGENT_BIN,
        &[
            "--config",
            conf.to_str().unwrap(),
            "--procfs",
            procfs.to_str().unwrap(),
            "--statsd-address",
            &statsd_addr,
            "--statsd-prefix",
            "test",
            "--statsd-interval",
            "100",
            "--no-server",
        ],
        tmp_dir.path(),
    )?;

    // The counters of the fixture never change, so the cpu load is NaN and never sent.
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    while !(received.iter().any(|l: &String| l.starts_with("test.memory-load:"))
        && received.iter().any(|l| l.starts_with("test.connections:")))
    {
        let (n, _) = statsd.recv_from(&mut buf)?;
        received.push(String::from_utf8_lossy(&buf[..n]).into_owned());
    }
    assert!(received.contains(&String::from("test.connections:1|g")), "{received:?}");
    let memory = received.iter().find(|l| l.starts_with("test.memory-load:")).unwrap();
    assert!(memory.starts_with("test.memory-load:56.129"), "{memory}");
    assert!(memory.ends_with("|g"));
    assert!(received.iter().all(|l| !l.contains("NaN")), "{received:?}");

    // the default config has been written
    assert!(conf.exists());
    Ok(())
}
