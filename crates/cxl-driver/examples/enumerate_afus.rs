//! List CAPI adapters and their AFUs
//!
//! Honours `CXL_SYSFS_CLASS` for relocated trees.

use anyhow::Context;
use cxl_driver::{AdapterCursor, AfuMode};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("cxl_driver=debug")
        .init();

    println!("🔍 CAPI adapters\n");

    let mut found = 0;
    for adapter in AdapterCursor::open().context("Is the cxl driver loaded?")? {
        let adapter = adapter?;
        let attrs = adapter.attributes();

        match (attrs.caia_version(), attrs.psl_revision()) {
            (Ok((major, minor)), Ok(psl)) => {
                println!("{}: CAIA {major}.{minor}, PSL revision {psl}", adapter.name());
            }
            _ => println!("{}", adapter.name()),
        }

        for afu in adapter.afus()? {
            let afu = afu?;
            let mode = afu.attributes().mode().unwrap_or(AfuMode::None);
            println!("  └─ {} ({mode:?})", afu.name());
            found += 1;
        }
    }

    println!("\n✅ {found} AFU(s)");
    Ok(())
}
