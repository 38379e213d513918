//! Proptest generators for property-based testing.

use proptest::prelude::*;

use pagesync_core::{
    DiscoveryPayload, MessageKind, PeerHandle, PeerId, ServiceDescriptor, StateMessage, Timestamp,
    MAX_DESCRIPTOR_LEN,
};

/// Generate a valid declared service name.
pub fn service_name() -> impl Strategy<Value = String> {
    "[a-z0-9]([a-z0-9-]{0,13}[a-z0-9])?".prop_map(String::from)
}

/// Generate a descriptor from a valid service name.
pub fn descriptor() -> impl Strategy<Value = ServiceDescriptor> {
    service_name().prop_filter_map("declared name rejected", |name| {
        ServiceDescriptor::declared(&name).ok()
    })
}

/// Generate a reverse-DNS app identifier that derives to a valid descriptor.
pub fn app_id() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z0-9]{1,12}", 2..=4).prop_map(|labels| labels.join("."))
}

/// Generate an app identifier longer than a descriptor after separators
/// are removed.
pub fn long_app_id() -> impl Strategy<Value = String> {
    app_id().prop_filter("too short to truncate", |id| {
        id.replace('.', "").len() > MAX_DESCRIPTOR_LEN
    })
}

/// Generate a display name.
pub fn peer_name() -> impl Strategy<Value = PeerId> {
    "[A-Za-z][A-Za-z0-9' -]{0,30}".prop_map(PeerId::new)
}

/// Generate a connection handle.
pub fn peer_handle() -> impl Strategy<Value = PeerHandle> {
    (any::<u64>(), peer_name()).prop_map(|(id, name)| PeerHandle::new(id, name))
}

/// Generate a plausible document size.
pub fn page_count() -> impl Strategy<Value = u32> {
    1u32..=500
}

/// Generate a payload advertising a page count.
pub fn payload() -> impl Strategy<Value = DiscoveryPayload> {
    page_count().prop_map(DiscoveryPayload::for_page_count)
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = Timestamp> {
    (0i64..=1_700_000_000_000i64).prop_map(Timestamp::from_millis)
}

/// Generate a MessageKind.
pub fn message_kind() -> impl Strategy<Value = MessageKind> {
    prop_oneof![Just(MessageKind::ConnectionSync), Just(MessageKind::StateChange)]
}

/// Parameters for generating a state message.
#[derive(Debug, Clone)]
pub struct StateMessageParams {
    pub value: i64,
    pub origin_start_time: Timestamp,
    pub kind: MessageKind,
}

impl Arbitrary for StateMessageParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            prop_oneof![-5i64..600, any::<i64>()], // mostly near a document, sometimes wild
            timestamp(),
            message_kind(),
        )
            .prop_map(|(value, origin_start_time, kind)| StateMessageParams {
                value,
                origin_start_time,
                kind,
            })
            .boxed()
    }
}

/// Generate a state message from parameters.
pub fn state_message_from_params(params: &StateMessageParams) -> StateMessage {
    match params.kind {
        MessageKind::ConnectionSync => {
            StateMessage::connection_sync(params.value, params.origin_start_time)
        }
        MessageKind::StateChange => StateMessage::state_change(params.value, params.origin_start_time),
    }
}
