//! Startup banner for `hookstream serve`.

use std::net::SocketAddr;

use crate::consts::{AUTHOR, REPO, STREAM_PATH, format_number};

pub struct BannerInfo<'a> {
    pub bind: SocketAddr,
    pub store: &'a str,
    pub capacity: usize,
    pub warmed: usize,
}

/// Print the startup banner with server info.
pub fn print_banner(info: &BannerInfo) {
    println!(
        r#"
   ╔═══════════════════════════════════════╗
   ║         H O O K S T R E A M           ║
   ║   live hook events, windowed views    ║
   ╚═══════════════════════════════════════╝

   version   {}
   by        {}
   repo      {}
   http      http://{}
   stream    ws://{}{}
   store     {}
   buffer    {} / {} events
"#,
        env!("CARGO_PKG_VERSION"),
        AUTHOR,
        REPO,
        info.bind,
        info.bind,
        STREAM_PATH,
        info.store,
        format_number(info.warmed as u64),
        format_number(info.capacity as u64),
    );
}
