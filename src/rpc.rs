// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Synchronous request/response calls between partitions over FF-A direct messages.

use arm_ffa::{DirectMsgArgs, Interface, TargetInfo};
use core::fmt::{self, Debug, Formatter};
use log::{debug, error};
use thiserror::Error;

/// Something which can make FF-A calls to the partition manager.
///
/// A call blocks until the partition manager hands control back with the next message for this
/// endpoint, which is returned.
pub trait MessageChannel {
    /// Makes the given FF-A call, and returns the message this endpoint is resumed with.
    fn call(&self, interface: Interface) -> Result<Interface, arm_ffa::Error>;
}

/// The framework-level identity of an endpoint, independent of the FF-A ID it is assigned.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct LogicalId(pub u8);

impl LogicalId {
    /// No endpoint.
    pub const NONE: Self = Self(0);
    /// The first normal world VM.
    pub const VM1: Self = Self(1);
    /// The second normal world VM.
    pub const VM2: Self = Self(2);
    /// The third normal world VM.
    pub const VM3: Self = Self(3);
    /// The first secure partition.
    pub const SP1: Self = Self(4);
    /// The second secure partition.
    pub const SP2: Self = Self(5);
    /// The third secure partition.
    pub const SP3: Self = Self(6);
    /// The fourth secure partition.
    pub const SP4: Self = Self(7);

    /// The partition which owns the real NVM and watchdog.
    pub const SERVICE_PROVIDER: Self = Self::SP1;
}

/// Maps logical IDs to FF-A endpoint IDs.
pub trait EndpointDirectory {
    /// Returns the FF-A endpoint ID of the given logical endpoint, if it exists on this system.
    fn endpoint_id(&self, logical_id: LogicalId) -> Option<u16>;

    /// Returns the logical ID of the endpoint we are running in.
    fn own_logical_id(&self) -> LogicalId;

    /// Returns the FF-A endpoint ID of the endpoint we are running in.
    fn own_endpoint_id(&self) -> u16;

    /// Returns a human readable name for the endpoint we are running in, used to prefix logs.
    fn own_name(&self) -> &'static str;
}

/// The sender and receiver of a direct message.
///
/// Packs into a single word as `(source << 16) | target`.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct RoutingWord {
    /// The FF-A ID of the sender.
    pub source: u16,
    /// The FF-A ID of the receiver.
    pub target: u16,
}

impl RoutingWord {
    /// Creates a routing from `source` to `target`.
    pub const fn new(source: u16, target: u16) -> Self {
        Self { source, target }
    }

    /// Returns the routing for a message going back the other way.
    pub const fn reply(self) -> Self {
        Self {
            source: self.target,
            target: self.source,
        }
    }
}

impl From<RoutingWord> for u32 {
    fn from(routing: RoutingWord) -> Self {
        (u32::from(routing.source) << 16) | u32::from(routing.target)
    }
}

impl Debug for RoutingWord {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:#06x} -> {:#06x}", self.source, self.target)
    }
}

/// A direct message request received by this endpoint.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DirectRequest {
    /// Who sent the request, and to whom.
    pub routing: RoutingWord,
    /// The five argument words.
    pub args: [u32; 5],
}

impl DirectRequest {
    /// Extracts a 32-bit direct message request from the given interface, if it is one.
    pub fn from_interface(interface: &Interface) -> Option<Self> {
        match interface {
            Interface::MsgSendDirectReq {
                src_id,
                dst_id,
                args: DirectMsgArgs::Args32(args),
            } => Some(Self {
                routing: RoutingWord::new(*src_id, *dst_id),
                args: *args,
            }),
            _ => None,
        }
    }
}

/// An error making a direct message call.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The partition manager returned something which couldn't be parsed.
    #[error("FF-A call failed: {0}")]
    Channel(arm_ffa::Error),
    /// The logical ID doesn't map to an endpoint on this system.
    #[error("No endpoint with logical ID {0:?}")]
    UnknownEndpoint(LogicalId),
    /// The call was answered with something other than a direct message response.
    #[error("Expected a direct message response but got {0:?}")]
    UnexpectedResponse(Interface),
}

impl From<arm_ffa::Error> for RpcError {
    fn from(e: arm_ffa::Error) -> Self {
        Self::Channel(e)
    }
}

/// Makes direct message calls on behalf of the current endpoint.
#[derive(Clone, Copy)]
pub struct Rpc<'a> {
    channel: &'a dyn MessageChannel,
    directory: &'a dyn EndpointDirectory,
}

impl<'a> Rpc<'a> {
    /// Creates a new `Rpc` making calls over `channel` on behalf of the endpoint which `directory`
    /// describes as its own.
    pub fn new(channel: &'a dyn MessageChannel, directory: &'a dyn EndpointDirectory) -> Self {
        Self { channel, directory }
    }

    /// Returns the directory used to resolve logical IDs.
    pub fn directory(&self) -> &'a dyn EndpointDirectory {
        self.directory
    }

    /// Returns the FF-A endpoint ID for the given logical ID.
    pub fn resolve(&self, logical_id: LogicalId) -> Result<u16, RpcError> {
        self.directory.endpoint_id(logical_id).ok_or_else(|| {
            error!("Can't resolve endpoint {logical_id:?}");
            RpcError::UnknownEndpoint(logical_id)
        })
    }

    /// Returns the routing for a message from this endpoint to the given one.
    pub fn routing_to(&self, target: LogicalId) -> Result<RoutingWord, RpcError> {
        Ok(RoutingWord::new(
            self.directory.own_endpoint_id(),
            self.resolve(target)?,
        ))
    }

    /// Sends `opcode` and `args` to the given endpoint and returns the five argument words of its
    /// direct message response.
    pub fn call(
        &self,
        target: LogicalId,
        opcode: u32,
        args: [u32; 4],
    ) -> Result<[u32; 5], RpcError> {
        let response = self.send_request(
            self.routing_to(target)?,
            [opcode, args[0], args[1], args[2], args[3]],
        )?;
        expect_direct_response(response)
    }

    /// Sends a direct message request and returns whatever comes back, without checking it.
    pub fn send_request(
        &self,
        routing: RoutingWord,
        args: [u32; 5],
    ) -> Result<Interface, RpcError> {
        debug!("Direct request {routing:?}: {args:#x?}");
        Ok(self.channel.call(Interface::MsgSendDirectReq {
            src_id: routing.source,
            dst_id: routing.target,
            args: DirectMsgArgs::Args32(args),
        })?)
    }

    /// Sends a direct message response, and returns the next message sent to this endpoint.
    pub fn respond(&self, routing: RoutingWord, args: [u32; 5]) -> Result<Interface, RpcError> {
        debug!("Direct response {routing:?}: {args:#x?}");
        Ok(self.channel.call(Interface::MsgSendDirectResp {
            src_id: routing.source,
            dst_id: routing.target,
            args: DirectMsgArgs::Args32(args),
        })?)
    }

    /// Resumes the endpoint which was interrupted, and returns the next message.
    pub fn resume(&self, target_info: TargetInfo) -> Result<Interface, RpcError> {
        Ok(self.channel.call(Interface::Run { target_info })?)
    }

    /// Waits for a message to be sent to this endpoint.
    pub fn wait(&self) -> Result<Interface, RpcError> {
        Ok(self.channel.call(Interface::MsgWait { flags: None })?)
    }
}

/// Returns the argument words of the given direct message response, or logs and returns an error
/// if it is some other message.
pub fn expect_direct_response(response: Interface) -> Result<[u32; 5], RpcError> {
    match &response {
        Interface::MsgSendDirectResp {
            args: DirectMsgArgs::Args32(args),
            ..
        } => Ok(*args),
        Interface::Error {
            error_code,
            error_arg,
            ..
        } => {
            error!("Direct request failed with {error_code:?} ({error_arg:#x})");
            Err(RpcError::UnexpectedResponse(response))
        }
        _ => {
            error!("Unexpected response to direct request: {response:?}");
            Err(RpcError::UnexpectedResponse(response))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::test::{FakeChannel, TestDirectory, direct_response};
    use arm_ffa::FfaError;

    #[test]
    fn routing_word_packing() {
        let routing = RoutingWord::new(0x8001, 0x0002);
        assert_eq!(u32::from(routing), 0x8001_0002);
        assert_eq!(routing.reply(), RoutingWord::new(0x0002, 0x8001));
    }

    #[test]
    fn call_sends_opcode_and_args() {
        let channel = FakeChannel::new([direct_response(0x8001, 0x0001, [9, 8, 7, 6, 5])]);
        let directory = TestDirectory::new(LogicalId::VM1);
        let rpc = Rpc::new(&channel, &directory);

        assert_eq!(
            rpc.call(LogicalId::SP1, 0x42, [1, 2, 3, 4]).unwrap(),
            [9, 8, 7, 6, 5]
        );
        assert_eq!(
            channel.sent(),
            [Interface::MsgSendDirectReq {
                src_id: 0x0001,
                dst_id: 0x8001,
                args: DirectMsgArgs::Args32([0x42, 1, 2, 3, 4]),
            }]
        );
    }

    #[test]
    fn wrong_response_is_an_error() {
        let channel = FakeChannel::new([Interface::Error {
            target_info: TargetInfo {
                endpoint_id: 0,
                vcpu_id: 0,
            },
            error_code: FfaError::Denied,
            error_arg: 0,
        }]);
        let directory = TestDirectory::new(LogicalId::VM1);
        let rpc = Rpc::new(&channel, &directory);

        let mut result = [0xdead; 5];
        match rpc.call(LogicalId::SP1, 0x42, [0; 4]) {
            Ok(args) => result = args,
            Err(e) => assert!(matches!(e, RpcError::UnexpectedResponse(_))),
        }
        assert_eq!(result, [0xdead; 5]);
    }

    #[test]
    fn unknown_endpoint_sends_nothing() {
        let channel = FakeChannel::new([]);
        let directory = TestDirectory::new(LogicalId::VM1);
        let rpc = Rpc::new(&channel, &directory);

        assert!(matches!(
            rpc.call(LogicalId(12), 1, [0; 4]),
            Err(RpcError::UnknownEndpoint(LogicalId(12)))
        ));
        assert!(channel.sent().is_empty());
    }
}
