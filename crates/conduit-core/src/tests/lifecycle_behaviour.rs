//! Behavioural tests for activation, suspension and teardown.

use std::cell::RefCell;

use rstest_bdd_macros::{given, scenario, then, when};

use crate::errors::DispatchError;
use crate::event::EventTag;
use crate::transport::{RawError, RawEvent};

use super::support::{ConnectionWorld, SERVICE, world};

const SEND_ORDER: [&str; 2] = ["first", "second"];

#[given("a published service")]
fn given_published_service(world: &RefCell<ConnectionWorld>) {
    let mut world = world.borrow_mut();
    let listener = world.harness.listen();
    world.listener = Some(listener);
}

#[given("a dialled client that has not been resumed")]
fn given_unresumed_client(world: &RefCell<ConnectionWorld>) {
    let mut world = world.borrow_mut();
    let client = world
        .harness
        .dispatcher
        .dial(SERVICE)
        .expect("dial should succeed");
    client
        .register(EventTag::Message, world.harness.log.handler())
        .expect("register message handler");
    client
        .register(EventTag::Error, world.harness.log.handler())
        .expect("register error handler");
    world.harness.settle();
    let peer = world
        .harness
        .log
        .accepted()
        .into_iter()
        .last()
        .expect("listener should accept the peer");
    world.client = Some(client);
    world.peer = Some(peer);
}

#[given("a connected client and peer")]
fn given_connected_pair(world: &RefCell<ConnectionWorld>) {
    world.borrow_mut().connect();
}

#[when("the peer sends two messages")]
fn when_peer_sends(world: &RefCell<ConnectionWorld>) {
    let world = world.borrow();
    for text in SEND_ORDER {
        world.peer().send(text).expect("peer send should succeed");
    }
    world.harness.settle();
}

#[when("the client sends two messages")]
fn when_client_sends(world: &RefCell<ConnectionWorld>) {
    let world = world.borrow();
    for text in SEND_ORDER {
        world.client().send(text).expect("client send should succeed");
    }
    world.harness.settle();
}

#[when("the client is resumed")]
fn when_client_resumed(world: &RefCell<ConnectionWorld>) {
    let world = world.borrow();
    world.client().resume().expect("resume should succeed");
    world.harness.settle();
}

#[when("the peer is suspended")]
fn when_peer_suspended(world: &RefCell<ConnectionWorld>) {
    let world = world.borrow();
    world.peer().suspend().expect("suspend should succeed");
}

#[when("the peer is resumed")]
fn when_peer_resumed(world: &RefCell<ConnectionWorld>) {
    let world = world.borrow();
    world.peer().resume().expect("resume should succeed");
    world.harness.settle();
}

#[when("the client is invalidated twice")]
fn when_client_invalidated_twice(world: &RefCell<ConnectionWorld>) {
    let world = world.borrow();
    world.client().invalidate();
    world.client().invalidate();
    world.harness.settle();
}

#[when("the transport reports the client connection invalid")]
fn when_transport_invalidates_client(world: &RefCell<ConnectionWorld>) {
    let world = world.borrow();
    world
        .harness
        .transport
        .inject(
            world.client().raw_handle(),
            RawEvent::Error(RawError::ConnectionInvalid),
        )
        .expect("inject should succeed");
    world.harness.settle();
}

#[then("the client has observed {count} messages")]
fn then_client_message_count(world: &RefCell<ConnectionWorld>, count: usize) {
    let world = world.borrow();
    let messages = world.harness.log.messages_on(world.client().id());
    assert_eq!(messages.len(), count, "client messages: {messages:?}");
}

#[then("the peer has observed {count} messages")]
fn then_peer_message_count(world: &RefCell<ConnectionWorld>, count: usize) {
    let world = world.borrow();
    let messages = world.harness.log.messages_on(world.peer().id());
    assert_eq!(messages.len(), count, "peer messages: {messages:?}");
}

#[then("the client observed the messages in send order")]
fn then_client_order(world: &RefCell<ConnectionWorld>) {
    let world = world.borrow();
    assert_eq!(world.harness.log.messages_on(world.client().id()), SEND_ORDER);
}

#[then("the peer observed the messages in send order")]
fn then_peer_order(world: &RefCell<ConnectionWorld>) {
    let world = world.borrow();
    assert_eq!(world.harness.log.messages_on(world.peer().id()), SEND_ORDER);
}

#[then("the client has observed exactly one terminal error")]
fn then_one_terminal_error(world: &RefCell<ConnectionWorld>) {
    let world = world.borrow();
    let errors = world.harness.log.errors_on(world.client().id());
    assert_eq!(
        errors,
        vec![(String::from(crate::INVALIDATED_BY_APPLICATION), true)]
    );
}

#[then("registering a handler on the client is refused")]
fn then_registration_refused(world: &RefCell<ConnectionWorld>) {
    let mut world = world.borrow_mut();
    let outcome = world
        .client()
        .register(EventTag::Message, world.harness.log.handler());
    let error = outcome.expect_err("registration after invalidation must fail");
    assert!(matches!(error, DispatchError::InvalidState { .. }));
    world.refusal = Some(error);
}

#[then("the client is invalidated")]
fn then_client_invalidated(world: &RefCell<ConnectionWorld>) {
    let world = world.borrow();
    assert!(world.client().is_invalidated());
    assert!(
        world
            .harness
            .transport
            .is_cancelled(world.client().raw_handle())
    );
}

#[then("the peer is invalidated")]
fn then_peer_invalidated(world: &RefCell<ConnectionWorld>) {
    let world = world.borrow();
    assert!(world.peer().is_invalidated());
    let errors = world.harness.log.errors_on(world.peer().id());
    assert_eq!(errors.len(), 1, "peer errors: {errors:?}");
}

#[scenario(
    path = "tests/features/connection_lifecycle.feature",
    name = "Messages sent before activation wait for resume"
)]
fn messages_wait_for_activation(world: RefCell<ConnectionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/connection_lifecycle.feature",
    name = "Suspension parks messages until the peer resumes"
)]
fn suspension_parks_messages(world: RefCell<ConnectionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/connection_lifecycle.feature",
    name = "Explicit invalidation reports one terminal error"
)]
fn explicit_invalidation(world: RefCell<ConnectionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/connection_lifecycle.feature",
    name = "A terminal transport error tears down both ends"
)]
fn terminal_transport_error(world: RefCell<ConnectionWorld>) {
    drop(world);
}
