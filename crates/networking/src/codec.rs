use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use libp2p::StreamProtocol;
use libp2p::request_response;
use std::io;

/// Maximum allowed size for a single wire frame
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length-prefixed frame codec: a `u32` big-endian length followed by the
/// raw payload bytes. Responses are empty frames and carry no data; a
/// received response only signals that the peer consumed the frame.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec;

#[async_trait]
impl request_response::Codec for FrameCodec {
    type Protocol = StreamProtocol;
    type Request = Vec<u8>;
    type Response = ();

    async fn read_request<T>(&mut self, _: &StreamProtocol, io: &mut T) -> io::Result<Vec<u8>>
    where
        T: AsyncRead + Unpin + Send,
    {
        let mut len_bytes = [0u8; 4];
        io.read_exact(&mut len_bytes).await?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds limit"),
            ));
        }
        let mut payload = vec![0u8; len];
        io.read_exact(&mut payload).await?;
        Ok(payload)
    }

    async fn read_response<T>(&mut self, _: &StreamProtocol, _io: &mut T) -> io::Result<()>
    where
        T: AsyncRead + Unpin + Send,
    {
        Ok(())
    }

    async fn write_request<T>(
        &mut self,
        _: &StreamProtocol,
        io: &mut T,
        payload: Vec<u8>,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        let len = u32::try_from(payload.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame too large"))?;
        io.write_all(&len.to_be_bytes()).await?;
        io.write_all(&payload).await?;
        io.flush().await
    }

    async fn write_response<T>(
        &mut self,
        _: &StreamProtocol,
        io: &mut T,
        _response: (),
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        io.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use libp2p::request_response::Codec as _;

    const PROTOCOL: StreamProtocol = StreamProtocol::new("/universal-client/tss/1.0.0");

    #[test]
    fn frames_round_trip() {
        block_on(async {
            let mut codec = FrameCodec;
            let mut buf = Vec::new();
            codec
                .write_request(&PROTOCOL, &mut buf, b"hello fleet".to_vec())
                .await
                .unwrap();

            assert_eq!(&buf[..4], &(11u32).to_be_bytes());

            let mut reader = &buf[..];
            let payload = codec.read_request(&PROTOCOL, &mut reader).await.unwrap();
            assert_eq!(payload, b"hello fleet");
        });
    }

    #[test]
    fn oversize_frames_are_rejected() {
        block_on(async {
            let mut codec = FrameCodec;
            let mut buf = Vec::new();
            buf.extend_from_slice(&(u32::MAX).to_be_bytes());
            buf.extend_from_slice(&[0u8; 16]);

            let mut reader = &buf[..];
            let err = codec.read_request(&PROTOCOL, &mut reader).await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        });
    }

    #[test]
    fn truncated_frames_error_cleanly() {
        block_on(async {
            let mut codec = FrameCodec;
            let mut buf = Vec::new();
            buf.extend_from_slice(&(100u32).to_be_bytes());
            buf.extend_from_slice(&[1u8; 10]);

            let mut reader = &buf[..];
            assert!(codec.read_request(&PROTOCOL, &mut reader).await.is_err());
        });
    }
}
