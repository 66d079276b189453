// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The client/server test handshake.
//!
//! A client partition runs its half of a test, and dispatches the server half to another endpoint
//! by sending it a test descriptor. Server partitions sit in [`Dispatcher::wait_for_dispatch`],
//! which runs whichever half of a test they are sent and also answers service requests.

mod descriptor;
pub mod registry;

pub use descriptor::{ParseDescriptorError, TestDescriptor, TestType};
pub use registry::{ClientFn, PARTITION_TESTS, PartitionTest, ServerFn, find_test};

use crate::{
    VAL_ERROR,
    rpc::{DirectRequest, LogicalId, Rpc, RpcError, RoutingWord, expect_direct_response},
    services::{ServiceHandler, ServiceOpcode, is_service_request},
    status::{StatusBuffer, TestStatus},
};
use arm_ffa::Interface;
use log::{debug, error, info};

/// Runs tests on behalf of the current endpoint.
pub struct Dispatcher<'a> {
    rpc: Rpc<'a>,
    services: Option<&'a dyn ServiceHandler>,
}

impl<'a> Dispatcher<'a> {
    /// Creates a dispatcher which makes its calls through `rpc`.
    pub fn new(rpc: Rpc<'a>) -> Self {
        Self {
            rpc,
            services: None,
        }
    }

    /// Creates a dispatcher which also answers service requests, for the service provider.
    pub fn with_services(rpc: Rpc<'a>, services: &'a dyn ServiceHandler) -> Self {
        Self {
            rpc,
            services: Some(services),
        }
    }

    /// Returns the `Rpc` used for calls to other endpoints, for use by test code.
    pub fn rpc(&self) -> Rpc<'a> {
        self.rpc
    }

    fn routing(&self, source: LogicalId, target: LogicalId) -> Result<RoutingWord, RpcError> {
        Ok(RoutingWord::new(
            self.rpc.resolve(source)?,
            self.rpc.resolve(target)?,
        ))
    }

    /// Asks the server named in the descriptor to run its half of the test, and waits for it to
    /// finish.
    ///
    /// Returns the words the server responded with.
    pub fn dispatch_to_server(
        &self,
        descriptor: TestDescriptor,
        args: [u32; 4],
    ) -> Result<[u32; 5], RpcError> {
        let descriptor = descriptor.with_test_type(TestType::Server);
        debug!("Dispatching {descriptor:?}");
        let response = self.rpc.send_request(
            self.routing(descriptor.client, descriptor.server)?,
            [descriptor.into(), args[0], args[1], args[2], args[3]],
        )?;
        expect_direct_response(response)
    }

    /// Sends the result of the server half of a test back to the client, and returns the next
    /// message sent to this endpoint.
    pub fn respond_to_client(
        &self,
        descriptor: TestDescriptor,
        result: [u32; 5],
    ) -> Result<Interface, RpcError> {
        self.rpc
            .respond(self.routing(descriptor.server, descriptor.client)?, result)
    }

    /// Runs the client half of the given test against the given server, recording its outcome in
    /// `status`.
    ///
    /// Returns the accumulated outcome.
    pub fn run_client_test(
        &self,
        test_num: u16,
        server: LogicalId,
        status: &StatusBuffer,
    ) -> TestStatus {
        let descriptor = TestDescriptor::new(
            test_num,
            self.rpc.directory().own_logical_id(),
            server,
            TestType::Client,
        );
        match find_test(test_num) {
            Some(test @ PartitionTest {
                client: Some(client),
                ..
            }) => self.run_client(test, *client, descriptor, status),
            _ => {
                error!("No client registered for test {test_num}");
                status.reset();
                status.status()
            }
        }
    }

    fn run_client(
        &self,
        test: &PartitionTest,
        client: ClientFn,
        descriptor: TestDescriptor,
        status: &StatusBuffer,
    ) -> TestStatus {
        info!("Running test {}: {}", test.test_num, test.name());
        status.reset();
        status.report(client(self, descriptor));
        status.status()
    }

    /// Serves requests until something other than a direct message request arrives.
    ///
    /// A client-tagged descriptor runs the client half of the test here, and its packed outcome is
    /// sent back in the first word of the response. A server-tagged descriptor runs the server
    /// half, which chooses all five words of the response.
    pub fn wait_for_dispatch(&self) {
        let mut message = self.rpc.wait();
        loop {
            let request = match &message {
                Ok(interface) => match DirectRequest::from_interface(interface) {
                    Some(request) => request,
                    None => {
                        error!("Expected a direct message request but got {interface:?}");
                        return;
                    }
                },
                Err(e) => {
                    error!("Failed to wait for a request: {e}");
                    return;
                }
            };
            message = self.handle_request(request);
        }
    }

    /// Handles a single request, and returns the next message.
    fn handle_request(&self, request: DirectRequest) -> Result<Interface, RpcError> {
        let [word, args @ ..] = request.args;
        let reply = request.routing.reply();

        if is_service_request(word) {
            let response = match (ServiceOpcode::try_from(word), self.services) {
                (Ok(opcode), Some(services)) => {
                    debug!("Handling {opcode:?} from {:#06x}", request.routing.source);
                    services.handle_request(opcode, args)
                }
                _ => {
                    error!("Can't handle service request {word:#x}");
                    [0, VAL_ERROR, 0, 0, 0]
                }
            };
            return self.rpc.respond(reply, response);
        }

        let descriptor = match TestDescriptor::try_from(word) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                error!("Invalid test descriptor: {e}");
                return self.rpc.respond(reply, [VAL_ERROR, 0, 0, 0, 0]);
            }
        };
        match (descriptor.test_type, find_test(descriptor.test_num)) {
            (
                TestType::Client,
                Some(
                    test @ PartitionTest {
                        client: Some(client),
                        ..
                    },
                ),
            ) => {
                let status = self.run_client(test, *client, descriptor, &StatusBuffer::new());
                self.rpc.respond(reply, [status.into(), 0, 0, 0, 0])
            }
            (
                TestType::Server,
                Some(PartitionTest {
                    server: Some(server),
                    ..
                }),
            ) => {
                debug!("Running server for test {}", descriptor.test_num);
                let result = server(self, descriptor, args);
                self.respond_to_client(descriptor, result)
            }
            _ => {
                if let Err(e) = self.rpc.respond(reply, [VAL_ERROR, 0, 0, 0, 0]) {
                    error!("Failed to reject {descriptor:?}: {e}");
                }
                panic!("No support for {descriptor:?}");
            }
        }
    }

    /// Waits for a request on a secondary core.
    ///
    /// Secondary cores don't run the server half of any test, so this only returns if the message
    /// received isn't a direct request.
    pub fn secondary_wait_for_dispatch(&self) {
        match self.rpc.wait() {
            Ok(interface) => match DirectRequest::from_interface(&interface) {
                Some(request) => panic!("No support for {request:?} on secondary core"),
                None => error!("Expected a direct message request but got {interface:?}"),
            },
            Err(e) => error!("Failed to wait for a request: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        VAL_SUCCESS,
        partition_test,
        platform::test::{
            FakeChannel, TestDirectory, TestNvm, bus, direct_request, direct_response,
        },
        services::{ServiceRouter, watchdog::NoWatchdog},
        status::TestState,
    };
    use arm_ffa::{DirectMsgArgs, FfaError, TargetInfo};
    use std::thread;

    partition_test!(7, echo, server = echo_server);
    fn echo_server(_: &Dispatcher, descriptor: TestDescriptor, args: [u32; 4]) -> [u32; 5] {
        [
            descriptor.test_num.into(),
            args[0],
            args[1],
            args[2],
            args[3],
        ]
    }

    partition_test!(8, client_only, client = client_only_client);
    fn client_only_client(_: &Dispatcher, descriptor: TestDescriptor) -> TestStatus {
        assert_eq!(descriptor.test_type, TestType::Client);
        TestStatus::new(TestState::Skip, descriptor.server.0.into())
    }

    fn sentinel() -> Interface {
        Interface::Error {
            target_info: TargetInfo::default(),
            error_code: FfaError::Denied,
            error_arg: 0,
        }
    }

    #[test]
    fn registry() {
        let test = find_test(7).unwrap();
        assert_eq!(test.name(), "dispatch::tests::echo");
        assert!(test.client.is_none());
        assert!(test.server.is_some());
        assert!(find_test(8).unwrap().server.is_none());
        assert!(find_test(1234).is_none());
    }

    #[test]
    fn dispatch_end_to_end() {
        let (client_channel, server_channel) = bus();
        let descriptor = TestDescriptor::new(7, LogicalId::VM1, LogicalId::VM2, TestType::Client);

        thread::scope(|s| {
            s.spawn(move || {
                let directory = TestDirectory::new(LogicalId::VM2);
                Dispatcher::new(Rpc::new(&server_channel, &directory)).wait_for_dispatch();
            });

            let directory = TestDirectory::new(LogicalId::VM1);
            let client_channel = client_channel;
            let dispatcher = Dispatcher::new(Rpc::new(&client_channel, &directory));
            assert_eq!(
                dispatcher
                    .dispatch_to_server(descriptor, [11, 22, 33, 44])
                    .unwrap(),
                [7, 11, 22, 33, 44]
            );
        });
    }

    #[test]
    fn dispatch_retags_descriptor() {
        let channel = FakeChannel::new([direct_response(0x0002, 0x0001, [1, 2, 3, 4, 5])]);
        let directory = TestDirectory::new(LogicalId::VM1);
        let dispatcher = Dispatcher::new(Rpc::new(&channel, &directory));

        let descriptor = TestDescriptor::new(7, LogicalId::VM1, LogicalId::VM2, TestType::Client);
        assert_eq!(
            dispatcher.dispatch_to_server(descriptor, [9, 8, 7, 6]).unwrap(),
            [1, 2, 3, 4, 5]
        );
        assert_eq!(
            channel.sent(),
            [direct_request(0x0001, 0x0002, [0x0121_0007, 9, 8, 7, 6])]
        );
    }

    #[test]
    fn server_responds_to_client() {
        let request = direct_request(0x0001, 0x8002, [0x0151_0007, 5, 6, 7, 8]);
        let channel = FakeChannel::new([request, sentinel()]);
        let directory = TestDirectory::new(LogicalId::SP2);
        Dispatcher::new(Rpc::new(&channel, &directory)).wait_for_dispatch();

        assert_eq!(
            channel.sent(),
            [
                Interface::MsgWait { flags: None },
                Interface::MsgSendDirectResp {
                    src_id: 0x8002,
                    dst_id: 0x0001,
                    args: DirectMsgArgs::Args32([7, 5, 6, 7, 8]),
                },
            ]
        );
    }

    #[test]
    fn unknown_test_type_is_rejected() {
        let channel = FakeChannel::new([
            direct_request(0x0001, 0x0002, [0x0221_0007, 0, 0, 0, 0]),
            direct_request(0x0001, 0x0002, [0x0121_0007, 1, 1, 1, 1]),
            sentinel(),
        ]);
        let directory = TestDirectory::new(LogicalId::VM2);
        Dispatcher::new(Rpc::new(&channel, &directory)).wait_for_dispatch();

        let sent = channel.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1], direct_response(0x0002, 0x0001, [VAL_ERROR, 0, 0, 0, 0]));
        assert_eq!(sent[2], direct_response(0x0002, 0x0001, [7, 1, 1, 1, 1]));
    }

    #[test]
    #[should_panic(expected = "No support")]
    fn unregistered_server_is_fatal() {
        let channel = FakeChannel::new([
            direct_request(0x0001, 0x0002, [0x0121_0008, 0, 0, 0, 0]),
            sentinel(),
        ]);
        let directory = TestDirectory::new(LogicalId::VM2);
        Dispatcher::new(Rpc::new(&channel, &directory)).wait_for_dispatch();
    }

    #[test]
    fn client_descriptor_runs_client_half() {
        // Test 8 as client VM1 against server SP1, then test 7 as server VM1 for client VM2.
        let channel = FakeChannel::new([
            direct_request(0x0002, 0x0001, [0x0041_0008, 0, 0, 0, 0]),
            direct_request(0x0002, 0x0001, [0x0112_0007, 1, 2, 3, 4]),
            sentinel(),
        ]);
        let directory = TestDirectory::new(LogicalId::VM1);
        Dispatcher::new(Rpc::new(&channel, &directory)).wait_for_dispatch();

        assert_eq!(
            channel.sent(),
            [
                Interface::MsgWait { flags: None },
                direct_response(0x0001, 0x0002, [0x0200_0004, 0, 0, 0, 0]),
                direct_response(0x0001, 0x0002, [7, 1, 2, 3, 4]),
            ]
        );
    }

    #[test]
    #[should_panic(expected = "No support")]
    fn unregistered_client_is_fatal() {
        let channel = FakeChannel::new([
            direct_request(0x0002, 0x0001, [0x0041_0007, 0, 0, 0, 0]),
            sentinel(),
        ]);
        let directory = TestDirectory::new(LogicalId::VM1);
        Dispatcher::new(Rpc::new(&channel, &directory)).wait_for_dispatch();
    }

    #[test]
    fn provider_answers_service_requests() {
        let channel = FakeChannel::new([
            direct_request(
                0x0001,
                0x8001,
                [ServiceOpcode::NvmWrite.into(), 4, 4, 0xCAFE_BABE, 0],
            ),
            sentinel(),
        ]);
        let directory = TestDirectory::new(LogicalId::SP1);
        let nvm = TestNvm::new();
        let rpc = Rpc::new(&channel, &directory);
        let router = ServiceRouter::new(rpc, &nvm, &NoWatchdog);
        Dispatcher::with_services(rpc, &router).wait_for_dispatch();

        assert_eq!(nvm.word(4), 0xCAFE_BABE);
        assert_eq!(
            channel.sent()[1],
            direct_response(0x8001, 0x0001, [0, VAL_SUCCESS, 0, 0, 0])
        );
    }

    #[test]
    fn service_request_without_provider_fails() {
        let channel = FakeChannel::new([
            direct_request(0x0001, 0x0002, [ServiceOpcode::NvmRead.into(), 0, 4, 0, 0]),
            sentinel(),
        ]);
        let directory = TestDirectory::new(LogicalId::VM2);
        Dispatcher::new(Rpc::new(&channel, &directory)).wait_for_dispatch();

        assert_eq!(
            channel.sent()[1],
            direct_response(0x0002, 0x0001, [0, VAL_ERROR, 0, 0, 0])
        );
    }

    #[test]
    fn run_client_test_records_outcome() {
        let channel = FakeChannel::new([]);
        let directory = TestDirectory::new(LogicalId::VM1);
        let dispatcher = Dispatcher::new(Rpc::new(&channel, &directory));
        let status = StatusBuffer::new();

        assert_eq!(
            dispatcher.run_client_test(8, LogicalId::SP3, &status),
            TestStatus::new(TestState::Skip, 6)
        );
        assert_eq!(
            dispatcher.run_client_test(7, LogicalId::SP3, &status),
            TestStatus::INVALID
        );
    }

    #[test]
    fn secondary_returns_on_non_request() {
        let channel = FakeChannel::new([sentinel()]);
        let directory = TestDirectory::new(LogicalId::SP1);
        Dispatcher::new(Rpc::new(&channel, &directory)).secondary_wait_for_dispatch();
        assert_eq!(channel.sent(), [Interface::MsgWait { flags: None }]);
    }

    #[test]
    #[should_panic(expected = "on secondary core")]
    fn secondary_request_is_fatal() {
        let channel = FakeChannel::new([direct_request(0x0001, 0x8001, [0x0141_0007, 0, 0, 0, 0])]);
        let directory = TestDirectory::new(LogicalId::SP1);
        Dispatcher::new(Rpc::new(&channel, &directory)).secondary_wait_for_dispatch();
    }
}
