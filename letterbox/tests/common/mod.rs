#![allow(dead_code)]
pub mod constants;

use anyhow::{bail, Context, Result};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::process::Command;
use std::thread;

use constants::{IMAP_ADDR, SMALL_DELAY};

pub fn letterbox_daemon_dev(mut fx: impl FnMut(&mut TcpStream) -> Result<()>) -> Result<()> {
    // Check port is not used (= free) before starting the test
    let mut max_retry = 20;
    loop {
        max_retry -= 1;
        match (TcpStream::connect(IMAP_ADDR), max_retry) {
            (Ok(_), 0) => bail!(
                "something is listening on {} and prevent the test from starting",
                IMAP_ADDR
            ),
            (Ok(_), _) => println!(
                "something is listening on {}, maybe a previous daemon quitting, retrying soon...",
                IMAP_ADDR
            ),
            (Err(_), _) => {
                println!("test ready to start, {} is free!", IMAP_ADDR);
                break;
            }
        }
        thread::sleep(SMALL_DELAY);
    }

    // Start daemon
    let mut daemon = Command::new(env!("CARGO_BIN_EXE_letterbox"))
        .arg("--dev")
        .arg("daemon")
        .spawn()?;

    // Check that our daemon is correctly listening on the free port
    let mut max_retry = 20;
    let mut imap_socket = loop {
        max_retry -= 1;
        match (TcpStream::connect(IMAP_ADDR), max_retry) {
            (Err(e), 0) => bail!("no more retry, last error is: {}", e),
            (Err(e), _) => {
                println!("unable to connect: {} ; will retry soon...", e);
            }
            (Ok(v), _) => break v,
        }
        thread::sleep(SMALL_DELAY);
    };

    println!("-- ready to test imap features --");
    let result = fx(&mut imap_socket);
    println!("-- test teardown --");

    // the server may already have closed the connection after LOGOUT
    let _ = imap_socket.shutdown(Shutdown::Both);
    daemon.kill().context("daemon should be killed")?;

    result.context("all tests passed")
}

/// Read until the buffer ends with a full line, and contains `stop_marker`
/// if one is given.
pub fn read_lines<'a, F: Read>(
    reader: &mut F,
    buffer: &'a mut [u8],
    stop_marker: Option<&[u8]>,
) -> Result<&'a [u8]> {
    let mut nbytes = 0;
    loop {
        let n = reader.read(&mut buffer[nbytes..])?;
        if n == 0 {
            bail!("connection closed after {} bytes", nbytes);
        }
        nbytes += n;
        let pre_condition = match stop_marker {
            None => true,
            Some(mark) => buffer[..nbytes].windows(mark.len()).any(|w| w == mark),
        };
        if pre_condition && nbytes >= 2 && &buffer[nbytes - 2..nbytes] == &b"\r\n"[..] {
            break;
        }
    }
    println!("read: {}", std::str::from_utf8(&buffer[..nbytes])?);
    Ok(&buffer[..nbytes])
}

/// Send `cmd` and wait for the tagged completion of `tag`.
pub fn exchange(imap: &mut TcpStream, tag: &str, cmd: &str) -> Result<String> {
    let mut buffer: [u8; 6000] = [0; 6000];
    imap.write_all(format!("{} {}\r\n", tag, cmd).as_bytes())?;
    let marker = format!("{} ", tag);
    let read = read_lines(imap, &mut buffer, Some(marker.as_bytes()))?;
    Ok(String::from_utf8_lossy(read).into_owned())
}
