// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

mod device;

use std::time::Duration;

use futures::StreamExt as _;
use tokio::time::timeout;

use device::{config, SimDevice};
use sun2000_modbus::{
    catalogue::sun2000::{self, GRID_FREQUENCY},
    file::optimizer::{OnlineStatus, SystemInformationFile},
    Device, Error,
};

const FILE_ID: u16 = 0x44;

fn setup(sim: &SimDevice) -> Device {
    let _ = env_logger::builder().is_test(true).try_init();
    Device::new(config(), sun2000::catalogue(), Box::new(sim.clone()))
}

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

fn closes(sim: &SimDevice) -> usize {
    sim.writes_to(49_200)
        .iter()
        .filter(|words| words.first() == Some(&3))
        .count()
}

#[tokio::test]
async fn read_file_in_chunks() -> anyhow::Result<()> {
    let sim = SimDevice::new();
    sim.state().files.insert(FILE_ID, content(500));
    let device = setup(&sim);

    let mut chunks = device.read_file(FILE_ID, &[]).await?;
    assert_eq!(500, chunks.len());

    let mut received = Vec::new();
    while let Some(chunk) = chunks.next_chunk().await {
        let chunk = chunk?;
        assert_eq!(received.iter().map(|(len, _)| len).sum::<usize>() as u32, chunk.offset);
        received.push((chunk.data.len(), chunk.eof));
    }

    assert_eq!(
        vec![(128, false), (128, false), (128, false), (116, true)],
        received
    );
    assert_eq!(1, closes(&sim));
    Ok(())
}

#[tokio::test]
async fn collect_whole_file() -> anyhow::Result<()> {
    let sim = SimDevice::new();
    sim.state().files.insert(FILE_ID, content(300));
    let device = setup(&sim);

    let data = device.read_file(FILE_ID, &[]).await?.collect().await?;

    assert_eq!(content(300), data.to_vec());
    Ok(())
}

#[tokio::test]
async fn stream_of_chunks() -> anyhow::Result<()> {
    let sim = SimDevice::new();
    sim.state().files.insert(FILE_ID, content(200));
    let device = setup(&sim);

    let chunks: Vec<_> = device
        .read_file(FILE_ID, &[])
        .await?
        .into_stream()
        .collect()
        .await;

    assert_eq!(2, chunks.len());
    assert!(chunks.iter().all(Result::is_ok));
    Ok(())
}

#[tokio::test]
async fn single_transfer_at_a_time() -> anyhow::Result<()> {
    let sim = SimDevice::new();
    sim.state().files.insert(FILE_ID, content(500));
    sim.state().files.insert(0x45, content(10));
    let device = setup(&sim);

    let first = device.read_file(FILE_ID, &[]).await?;
    let err = device.read_file(0x45, &[]).await.unwrap_err();
    assert!(matches!(err, Error::TransferAlreadyActive));

    drop(first);
    let second = device.read_file(0x45, &[]).await?;
    assert_eq!(10, second.len());
    Ok(())
}

#[tokio::test]
async fn abandoned_transfer_is_closed() -> anyhow::Result<()> {
    let sim = SimDevice::new();
    sim.state().files.insert(FILE_ID, content(500));
    let device = setup(&sim);

    let mut chunks = device.read_file(FILE_ID, &[]).await?;
    chunks.next_chunk().await.unwrap()?;
    drop(chunks);

    // Queued behind the close.
    device.get([GRID_FREQUENCY]).await?;
    assert_eq!(1, closes(&sim));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancelled_chunk_aborts_the_transfer() -> anyhow::Result<()> {
    let sim = SimDevice::new();
    sim.state().files.insert(FILE_ID, content(500));
    let device = setup(&sim);

    let mut chunks = device.read_file(FILE_ID, &[]).await?;
    let first = chunks.next_chunk().await.unwrap()?;
    assert_eq!((0, 128), (first.offset, first.data.len()));

    sim.state().read_delay = Duration::from_secs(1);
    let cancelled = timeout(Duration::from_millis(500), chunks.next_chunk()).await;
    assert!(cancelled.is_err());

    // The second chunk is gone, continuing would skip it.
    let err = chunks.next_chunk().await.unwrap().unwrap_err();
    assert!(matches!(err, Error::TransferAborted));
    assert!(chunks.next_chunk().await.is_none());

    sim.state().read_delay = Duration::ZERO;
    device.get([GRID_FREQUENCY]).await?;
    assert_eq!(1, closes(&sim));
    Ok(())
}

#[tokio::test]
async fn checksum_mismatch_is_detected() -> anyhow::Result<()> {
    let sim = SimDevice::new();
    sim.state().files.insert(FILE_ID, content(100));
    sim.state().corrupt_checksum = true;
    let device = setup(&sim);

    let err = device
        .read_file(FILE_ID, &[])
        .await?
        .collect()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ChecksumMismatch { file_id: FILE_ID, .. }));
    Ok(())
}

#[tokio::test]
async fn reconnect_aborts_the_transfer() -> anyhow::Result<()> {
    let sim = SimDevice::new();
    sim.state().files.insert(FILE_ID, content(500));
    let device = setup(&sim);

    let mut chunks = device.read_file(FILE_ID, &[]).await?;
    device.disconnect().await?;

    let err = chunks.next_chunk().await.unwrap().unwrap_err();
    assert!(matches!(err, Error::TransferAborted));
    assert!(chunks.next_chunk().await.is_none());
    Ok(())
}

#[tokio::test]
async fn unknown_file_is_rejected() {
    let sim = SimDevice::new();
    let device = setup(&sim);

    let err = device.read_file(0x99, &[]).await.unwrap_err();

    assert!(matches!(err, Error::FileRejected { file_id: 0x99, status: 2 }));
}

#[tokio::test]
async fn parse_optimizer_system_information() -> anyhow::Result<()> {
    let mut file = b"V102".to_vec();
    file.extend([0, 1, 0, 0, 0, 0, 0, 0, 0, 1]);
    file.extend([0, 7, 0, 1, 3, 3, 0, 4]);
    for (text, len) in [("SN42", 20), ("V100", 30), ("east", 20), ("MERC-600W", 30)] {
        let mut field = text.as_bytes().to_vec();
        field.resize(len, 0);
        file.extend(field);
    }
    let sim = SimDevice::new();
    sim.state()
        .files
        .insert(SystemInformationFile::FILE_TYPE, file);
    let device = setup(&sim);

    let data = device
        .read_file(SystemInformationFile::FILE_TYPE, &[])
        .await?
        .collect()
        .await?;
    let info = SystemInformationFile::parse(&data)?;

    assert_eq!("V102", info.file_version);
    let optimizer = &info.optimizers[0];
    assert_eq!(7, optimizer.address);
    assert_eq!(OnlineStatus::Online, optimizer.online_status);
    assert_eq!(3, optimizer.string_number);
    assert_eq!(Some(4), optimizer.position_in_string);
    assert_eq!("SN42", optimizer.serial_number);
    assert_eq!("MERC-600W", optimizer.model);
    Ok(())
}
