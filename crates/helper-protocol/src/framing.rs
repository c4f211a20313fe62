//! Length-prefixed frames.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::HelperProtocolError;
use crate::protocol::MAX_MESSAGE_SIZE;

/// Write one JSON frame
pub(crate) async fn write_frame<W, T>(stream: &mut W, message: &T) -> Result<(), HelperProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(message)
        .map_err(|e| HelperProtocolError::Serialization(e.to_string()))?;

    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(HelperProtocolError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    // Bounded by MAX_MESSAGE_SIZE above
    let len = (bytes.len() as u32).to_be_bytes();
    stream.write_all(&len).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one JSON frame. `Ok(None)` on a clean EOF before the length prefix.
pub(crate) async fn read_frame<R, T>(stream: &mut R) -> Result<Option<T>, HelperProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    match stream.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(HelperProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buffer = vec![0u8; len];
    stream.read_exact(&mut buffer).await?;

    serde_json::from_slice(&buffer)
        .map(Some)
        .map_err(|e| HelperProtocolError::InvalidMessage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_frame_round_trip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &json!({"hello": "helper"})).await.unwrap();
        let got: Option<Value> = read_frame(&mut b).await.unwrap();
        assert_eq!(got, Some(json!({"hello": "helper"})));
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(u32::MAX).to_be_bytes()).await.unwrap();
        let err = read_frame::<_, Value>(&mut b).await.unwrap_err();
        assert!(matches!(err, HelperProtocolError::MessageTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_eof_is_none() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let got: Option<Value> = read_frame(&mut b).await.unwrap();
        assert!(got.is_none());
    }
}
