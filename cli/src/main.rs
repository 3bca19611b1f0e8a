use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use quorate::{
    disk::MemoryDisk, hex::HexDisplayExt, ChildDevice, ConfigError,
    DriverRegistry, QuorumEvent, SECTOR_SIZE,
};
use tokio::sync::mpsc;
use tracing::info;

const DISK_LEN: usize = 64 * 1024;

type Opened = Result<Arc<dyn ChildDevice>, ConfigError>;

/// Stamps every sector with its own number so damage is easy to spot.
fn stamped(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    for (sector, chunk) in buf.chunks_mut(SECTOR_SIZE as usize).enumerate() {
        LittleEndian::write_u64(&mut chunk[..8], sector as u64);
    }
    buf
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let options = std::env::args().nth(1).unwrap_or_else(|| {
        "vote-threshold=2,rewrite-corrupted=on,\
         children.0=mem:a,children.1=mem:b,children.2=mem:c"
            .to_string()
    });

    let disks = Arc::new(std::sync::Mutex::new(Vec::new()));
    let opened = disks.clone();
    let resolver = move |descriptor: &str| -> Opened {
        let name = descriptor.strip_prefix("mem:").ok_or_else(|| {
            ConfigError::ChildOpen {
                descriptor: descriptor.to_string(),
                reason: "only mem: children are supported".into(),
            }
        })?;
        let disk = Arc::new(MemoryDisk::new(name, DISK_LEN));
        if let Ok(mut opened) = opened.lock() {
            opened.push(disk.clone());
        }
        Ok(disk as Arc<dyn ChildDevice>)
    };

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<QuorumEvent>();
    let device = DriverRegistry::new()
        .open("quorum", "quorum0", &options, &resolver)?
        .with_events(Arc::new(events_tx));
    let disks: Vec<Arc<MemoryDisk>> = match disks.lock() {
        Ok(disks) => disks.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };

    info!(length = device.get_length().await?, "device ready");

    let image = stamped(DISK_LEN);
    device.write(0, &image).await?;
    device.flush().await?;

    // damage the middle child behind the device's back
    disks[1].scramble(4096, 1024);
    info!(
        digest = %blake3::hash(&disks[1].contents()).as_bytes().hex().short(8),
        "corrupted child b"
    );

    let mut buf = vec![0u8; 8192];
    device.read(0, &mut buf).await?;
    assert_eq!(buf, image[..8192]);
    info!("read returned the majority content");

    let healed = disks[1].contents() == disks[0].contents();
    info!(healed, "child b after read");

    drop(device);
    while let Some(event) = events_rx.recv().await {
        match event {
            QuorumEvent::ReportBad {
                op, child, offset, ..
            } => info!(?op, %child, offset, "bad child"),
            QuorumEvent::Failure { offset, .. } => {
                info!(offset, "quorum failure")
            }
        }
    }
    Ok(())
}
