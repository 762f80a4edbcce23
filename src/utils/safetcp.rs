//! Safe TCP bind/connect/read/write helper functions.
//!
//! Every message on the wire is an 8-byte big-endian length followed by the
//! MessagePack encoding of the object.

use std::marker::Unpin;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};

use serde::de::DeserializeOwned;
use serde::Serialize;

use rmp_serde::decode::from_slice as decode_from_slice;
use rmp_serde::encode::to_vec as encode_to_vec;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::{self, Duration};

use crate::utils::DuolockError;

/// Largest object body accepted by `safe_tcp_read`. Lock requests and
/// replies are a few dozen bytes; anything near this is a corrupt header.
pub(crate) const MAX_MSG_LEN: usize = 64 * 1024;

/// Receives an object of type `T` from TCP readable connection `conn_read`,
/// using `read_buf` as buffer storage for partial reads. Returns:
///   - `Ok(obj)` if successful; upon returning, the read buffer is cleared
///   - `Err(err)` if any unexpected error occurs, including the peer closing
///     the connection
///
/// CANCELLATION SAFETY: we cannot use `read_u64()` and `read_exact()` here
/// because this function is intended to be used as a `tokio::select!` branch
/// and that those two methods are not cancellation-safe. Instead, in the case
/// of being cancelled midway before receiving the entire object (note that
/// such cancellation can only happen at `.await` points), bytes already read
/// are stored in the read buffer and will continue to be appended by future
/// invocations until successful returning.
pub(crate) async fn safe_tcp_read<T, Conn>(
    read_buf: &mut BytesMut,
    conn_read: &mut Conn,
) -> Result<T, DuolockError>
where
    T: DeserializeOwned,
    Conn: AsyncReadExt + Unpin,
{
    // read length of obj first
    if read_buf.capacity() < 8 {
        read_buf.reserve(8 - read_buf.capacity());
    }
    while read_buf.len() < 8 {
        // obj_len not wholesomely read from socket before last cancellation
        if conn_read.read_buf(read_buf).await? == 0 {
            return Err(DuolockError::msg("connection closed by peer"));
        }
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&read_buf[..8]);
    let obj_len = u64::from_be_bytes(len_bytes);

    // then read the obj itself, refusing absurd lengths before reserving
    let obj_end = usize::try_from(obj_len)
        .ok()
        .filter(|&len| len <= MAX_MSG_LEN)
        .and_then(|len| len.checked_add(8))
        .ok_or_else(|| {
            DuolockError(format!("object length {} too large", obj_len))
        })?;
    if read_buf.capacity() < obj_end {
        // capacity not big enough, reserve more space
        read_buf.reserve(obj_end - read_buf.capacity());
    }
    while read_buf.len() < obj_end {
        if conn_read.read_buf(read_buf).await? == 0 {
            return Err(DuolockError::msg("connection closed mid-object"));
        }
    }
    let obj = decode_from_slice(&read_buf[8..obj_end])?;

    // if reached this point, no further cancellation to this call is
    // possible (because there are no more awaits ahead); discard bytes
    // used in this call
    if read_buf.len() > obj_end {
        let buf_tail = Bytes::copy_from_slice(&read_buf[obj_end..]);
        read_buf.clear();
        read_buf.extend_from_slice(&buf_tail);
    } else {
        read_buf.clear();
    }

    Ok(obj)
}

/// Sends an object of type `T` to TCP writable connection `conn_write`:
/// length first, then the encoded bytes.
pub(crate) async fn safe_tcp_write<T, Conn>(
    conn_write: &mut Conn,
    obj: &T,
) -> Result<(), DuolockError>
where
    T: Serialize,
    Conn: AsyncWriteExt + Unpin,
{
    let obj_bytes = encode_to_vec(obj)?;
    conn_write.write_u64(obj_bytes.len() as u64).await?; // send length first
    conn_write.write_all(&obj_bytes[..]).await?;
    conn_write.flush().await?;
    Ok(())
}

/// Wrapper over tokio `TcpListener::bind()` that provides a retrying logic.
pub(crate) async fn tcp_bind_with_retry(
    bind_addr: SocketAddr,
    mut retries: u8,
) -> Result<TcpListener, DuolockError> {
    loop {
        let socket = if bind_addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.set_nodelay(true)?;

        let bound = socket.bind(bind_addr).and_then(|_| socket.listen(1024));
        match bound {
            Ok(listener) => return Ok(listener),
            Err(err) => {
                if retries == 0 {
                    return Err(err.into());
                }
                retries -= 1;
                time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Wrapper over tokio `TcpStream::connect()` that provides a retrying logic.
pub(crate) async fn tcp_connect_with_retry(
    conn_addr: SocketAddr,
    mut retries: u8,
) -> Result<TcpStream, DuolockError> {
    loop {
        match TcpStream::connect(conn_addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(err) => {
                if retries == 0 {
                    return Err(err.into());
                }
                retries -= 1;
                time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}
