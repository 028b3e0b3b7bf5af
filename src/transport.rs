//! Serial transport.
//!
//! The coordinator prints one record per line, so the port is read line by line and each
//! line becomes one chunk for the [`FrameAssembler`](crate::framing::FrameAssembler).
//! Invalid UTF-8 is replaced rather than rejected; the assembler copes with garbage.

use crate::config::SerialConfig;
use crate::error::{GatewayError, GatewayResult};
use futures::stream::Stream;
use std::pin::Pin;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Boxed stream of text chunks. Ends after the first error.
pub type ChunkStream = Pin<Box<dyn Stream<Item = GatewayResult<String>> + Send>>;

/// Split `reader` into line chunks without their terminators.
///
/// End of input is reported as [`GatewayError::SerialUnexpectedEof`], since a serial
/// device never legitimately closes.
pub fn line_chunks<R>(reader: R, capacity: usize) -> ChunkStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let reader = BufReader::with_capacity(capacity.max(1), reader);
    Box::pin(futures::stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => Some((Err(GatewayError::SerialUnexpectedEof), None)),
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                Some((Ok(line), Some(reader)))
            }
            Err(e) => Some((Err(e.into()), None)),
        }
    }))
}

/// Open the configured serial device as a chunk stream.
#[cfg(feature = "serial")]
pub fn open(config: &SerialConfig) -> GatewayResult<ChunkStream> {
    use tokio_serial::SerialPortBuilderExt;

    let device = config.device.to_string_lossy();
    let port = tokio_serial::new(device.as_ref(), config.baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()?;
    tracing::info!(device = %device, baud = config.baud_rate, "Serial port opened");
    Ok(line_chunks(port, config.read_buffer))
}

/// Open the configured serial device as a chunk stream.
#[cfg(not(feature = "serial"))]
pub fn open(config: &SerialConfig) -> GatewayResult<ChunkStream> {
    tracing::error!(device = %config.device.display(), "Built without serial support");
    Err(GatewayError::SerialFeatureDisabled)
}
