//! Byte channel adapters
//!
//! The AT protocol client only needs two primitives from its transport: write a frame,
//! and take whatever bytes are already buffered without waiting. [`Adapter`] captures
//! exactly that, so the client runs unchanged over a real serial port or an in-memory
//! mock.

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial_adapter;

pub use mock::MockAdapter;
#[cfg(feature = "instrument_serial")]
pub use serial_adapter::SerialAdapter;

use anyhow::Result;
use async_trait::async_trait;

/// Duplex byte channel with a non-blocking read side.
#[async_trait]
pub trait Adapter: Send {
    /// Write all of `bytes` to the channel.
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Copy already-buffered bytes into `buffer`.
    ///
    /// Must not wait for data: returns `Ok(0)` when nothing is available.
    async fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;
}

#[async_trait]
impl<A: Adapter + ?Sized> Adapter for Box<A> {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes).await
    }

    async fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        (**self).read(buffer).await
    }
}
