//! Chunked large-data writes (image frames into device flash).
//!
//! Each chunk is a two-step exchange: a PREPARE_WRITE frame announcing length
//! and absolute address, then the raw bytes as a WRITE_DATA packet answered by
//! a WRITE_RESULT frame. Any failure aborts the whole transfer.

use super::service::{CommandService, DeviceEvent, check_status};
use super::types::{DeviceCmd, MAX_CHUNK, PKT_WRITE_DATA, WRITE_ALIGNMENT};
use crate::error::{AppError, ChunkStage, Result};
use std::time::Duration;
use tracing::{debug, info};

/// Placement of one chunk within a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Byte offset into the source buffer.
    pub offset: usize,
    /// Absolute flash address the chunk is written to.
    pub address: u32,
    pub len: usize,
}

/// Split `total` bytes starting at `address` into chunks of at most `MAX_CHUNK`.
pub fn plan_chunks(address: u32, total: usize) -> Result<Vec<ChunkPlan>> {
    if address % WRITE_ALIGNMENT != 0 {
        return Err(AppError::Misaligned { address });
    }
    if u32::try_from(total)
        .ok()
        .and_then(|len| address.checked_add(len))
        .is_none()
    {
        return Err(AppError::validation(format!(
            "{total} bytes at 0x{address:X} exceed the 32-bit address space"
        )));
    }

    let mut plan = Vec::with_capacity(total.div_ceil(MAX_CHUNK));
    let mut offset = 0;
    while offset < total {
        let len = (total - offset).min(MAX_CHUNK);
        plan.push(ChunkPlan {
            offset,
            // Bounded by the overflow check above.
            address: address + offset as u32,
            len,
        });
        offset += len;
    }
    Ok(plan)
}

/// PREPARE_WRITE payload: `reserved:u8 | len:u16 | address:u32`, all LE.
pub(crate) fn prepare_write_payload(chunk: &ChunkPlan) -> [u8; 7] {
    let mut payload = [0u8; 7];
    payload[1..3].copy_from_slice(&(chunk.len as u16).to_le_bytes());
    payload[3..7].copy_from_slice(&chunk.address.to_le_bytes());
    payload
}

impl CommandService {
    /// Write `data` to device flash starting at a 4K-aligned `address`.
    ///
    /// Progress is published as `DeviceEvent::Progress` after every chunk.
    pub async fn write_large_data(&self, address: u32, data: &[u8], timeout: Duration) -> Result<()> {
        self.write_large_data_with_progress(address, data, timeout, |_, _| {})
            .await
    }

    /// Like [`write_large_data`](Self::write_large_data), also calling
    /// `on_progress(sent, total)` after every acknowledged chunk.
    pub async fn write_large_data_with_progress<F>(
        &self,
        address: u32,
        data: &[u8],
        timeout: Duration,
        mut on_progress: F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let plan = plan_chunks(address, data.len())?;
        let total = data.len();

        info!(
            "Writing {total} bytes at 0x{address:08X} in {} chunks",
            plan.len()
        );

        let _guard = self.lock_commands().await;
        for chunk in &plan {
            debug!(
                "Chunk at offset {} -> 0x{:08X} ({} bytes)",
                chunk.offset, chunk.address, chunk.len
            );
            self.write_chunk(chunk, &data[chunk.offset..chunk.offset + chunk.len], timeout)
                .await?;

            let sent = chunk.offset + chunk.len;
            on_progress(sent, total);
            self.emit(DeviceEvent::Progress { sent, total });
        }

        info!("Wrote {total} bytes at 0x{address:08X}");
        Ok(())
    }

    /// Prepare + data exchange for one chunk. Caller holds the command lock.
    async fn write_chunk(&self, chunk: &ChunkPlan, bytes: &[u8], timeout: Duration) -> Result<()> {
        let fail = |stage: ChunkStage, source: AppError| AppError::ChunkFailed {
            stage,
            offset: chunk.offset,
            source: Box::new(source),
        };

        let prepare = DeviceCmd::PrepareWrite as u8;
        self.transact(prepare, &prepare_write_payload(chunk), timeout)
            .await
            .and_then(|payload| check_status(prepare, &payload))
            .map_err(|e| fail(ChunkStage::Prepare, e))?;

        let result = DeviceCmd::WriteResult as u8;
        self.exchange(PKT_WRITE_DATA, bytes, result, timeout)
            .await
            .and_then(|payload| check_status(result, &payload))
            .map_err(|e| fail(ChunkStage::Write, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_10000_bytes() {
        let plan = plan_chunks(0x2000, 10000).unwrap();
        let sizes: Vec<usize> = plan.iter().map(|c| c.len).collect();
        assert_eq!(sizes, vec![4096, 4096, 1808]);
        assert_eq!(sizes.iter().sum::<usize>(), 10000);
        for (i, chunk) in plan.iter().enumerate() {
            assert_eq!(chunk.address, 0x2000 + 4096 * i as u32);
            assert_eq!(chunk.offset, 4096 * i);
        }
    }

    #[test]
    fn test_plan_exact_multiple() {
        let plan = plan_chunks(0, 8192).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1].len, 4096);
    }

    #[test]
    fn test_plan_empty() {
        assert!(plan_chunks(4096, 0).unwrap().is_empty());
    }

    #[test]
    fn test_plan_misaligned() {
        assert!(matches!(
            plan_chunks(4097, 100),
            Err(AppError::Misaligned { address: 4097 })
        ));
        assert!(plan_chunks(4096, 100).is_ok());
    }

    #[test]
    fn test_plan_address_overflow() {
        assert!(matches!(
            plan_chunks(0xFFFF_F000, 8192),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_prepare_write_payload() {
        let chunk = ChunkPlan {
            offset: 4096,
            address: 0x0001_2000,
            len: 1808,
        };
        assert_eq!(
            prepare_write_payload(&chunk),
            [0x00, 0x10, 0x07, 0x00, 0x20, 0x01, 0x00]
        );
    }
}
