//! Attach to the first AFU, dump a status register and wait for one event
//!
//! Usage: `cargo run --example attach_and_poll [WED]`

use anyhow::Context;
use cxl_driver::{AllAfus, AttachOptions, Endianness, RawEvent, View};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("cxl_driver=debug")
        .init();

    let wed = match std::env::args().nth(1) {
        Some(arg) => u64::from_str_radix(arg.trim_start_matches("0x"), 16)
            .with_context(|| format!("WED must be hex, got {arg}"))?,
        None => 0,
    };

    let afu = AllAfus::open()?
        .next()
        .context("No AFUs found")??;
    println!("🧩 Using {} on {}", afu.name(), afu.adapter());

    let mut handle = afu.open(View::Dedicated)?;
    handle.attach_with(
        wed,
        AttachOptions {
            num_interrupts: 1,
            amr: 0,
        },
    )?;
    println!("✅ Attached, process element {}", handle.process_element()?);

    handle.map_with(Endianness::Big)?;
    println!(
        "📟 MMIO {} bytes, register 0 = {:#018x}",
        handle.mmio_size().unwrap_or(0),
        handle.read64(0)?
    );

    println!("⏳ Waiting for an event...");
    let mut event = RawEvent::new();
    handle.read_event(&mut event)?;
    println!("📥 {}", event.decode());

    handle.close()?;
    Ok(())
}
