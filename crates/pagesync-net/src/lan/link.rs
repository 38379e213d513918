//! TCP links between LAN peers.
//!
//! Every link starts with a `Hello` exchange so both sides learn each
//! other's display name and instance, then carries length-delimited frames.

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use pagesync_core::{InstanceId, PeerId, ServiceDescriptor, PROTOCOL_VERSION};

use crate::error::{NetError, Result};

pub(crate) type FramedLink = Framed<TcpStream, LengthDelimitedCodec>;

/// Handshake record, sent by both sides as the first frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub v: u8,
    pub descriptor: ServiceDescriptor,
    pub name: PeerId,
    pub instance: InstanceId,
}

impl Hello {
    pub fn new(descriptor: ServiceDescriptor, name: PeerId, instance: InstanceId) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            descriptor,
            name,
            instance,
        }
    }

    fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| NetError::Codec(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let hello: Self =
            ciborium::from_reader(bytes).map_err(|e| NetError::Codec(e.to_string()))?;
        if hello.v != PROTOCOL_VERSION {
            return Err(NetError::Codec(format!("hello version {}", hello.v)));
        }
        Ok(hello)
    }
}

/// Wrap a stream in the length-delimited frame codec.
pub(crate) fn framed(stream: TcpStream, max_frame_len: usize) -> FramedLink {
    Framed::new(
        stream,
        LengthDelimitedCodec::builder()
            .max_frame_length(max_frame_len)
            .new_codec(),
    )
}

async fn send_hello(link: &mut FramedLink, hello: &Hello) -> Result<()> {
    link.send(hello.to_bytes()?).await?;
    Ok(())
}

async fn recv_hello(link: &mut FramedLink) -> Result<Hello> {
    let frame = link
        .next()
        .await
        .ok_or_else(|| NetError::InviteFailed("peer closed during handshake".into()))??;
    Hello::from_bytes(&frame)
}

/// Dialing side: send our hello, then wait for theirs.
pub(crate) async fn handshake_outbound(
    link: &mut FramedLink,
    local: &Hello,
    timeout: Duration,
) -> Result<Hello> {
    let exchange = async {
        send_hello(link, local).await?;
        recv_hello(link).await
    };
    let remote = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| NetError::InviteTimeout(local.descriptor.to_string()))??;

    if remote.descriptor != local.descriptor {
        return Err(NetError::InviteFailed(format!(
            "peer answered for {}",
            remote.descriptor
        )));
    }
    Ok(remote)
}

/// Accepting side: wait for their hello, answer with ours if the
/// descriptor matches. Invitations are otherwise always accepted.
pub(crate) async fn handshake_inbound(
    link: &mut FramedLink,
    local: &Hello,
    timeout: Duration,
) -> Result<Hello> {
    let remote = tokio::time::timeout(timeout, recv_hello(link))
        .await
        .map_err(|_| NetError::InviteTimeout("inbound handshake".into()))??;

    if remote.descriptor != local.descriptor {
        return Err(NetError::InviteFailed(format!(
            "invitation for {}",
            remote.descriptor
        )));
    }
    send_hello(link, local).await?;
    Ok(remote)
}
