use std::time;

pub static SMALL_DELAY: time::Duration = time::Duration::from_millis(200);

pub static IMAP_ADDR: &str = "127.0.0.1:1143";

pub static EMAIL: &[u8] = b"From: bob@example.tld\r
To: alice@example.tld\r
Subject: Behavior test\r
\r
Hello world!\r
";
