use super::{FlashError, FlashFile, FlashFs};

/// Storage admission check performed before every write.
///
/// The check and the write are not atomic with respect to other writers. A concurrent write that
/// lands in between is caught by [`FlashFile::append`], which refuses with the same
/// [`FlashError::NoSpace`] instead of writing a partial chunk.
#[derive(Debug, Clone)]
pub struct StorageGuard {
    flash: FlashFs,
}

impl StorageGuard {
    pub fn new(flash: FlashFs) -> Self {
        Self { flash }
    }

    /// Refuse if `len` bytes exceed the free space reported right now.
    pub async fn admit(&self, len: u64) -> Result<(), FlashError> {
        let available = self.flash.available_space().await?;
        if len > available {
            tracing::debug!(needed = len, available, "storage admission refused");
            return Err(FlashError::NoSpace {
                needed: len,
                available,
            });
        }
        Ok(())
    }

    /// Admit and then append `buf` to `file`.
    pub async fn write(&self, file: &mut FlashFile, buf: &[u8]) -> Result<(), FlashError> {
        self.admit(buf.len() as u64).await?;
        file.append(buf).await
    }
}
