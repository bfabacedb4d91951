// End-to-end scenarios over an in-process broker

use papo::broker::{self, BrokerConnection, RunningBroker};
use papo::chat::{AdminClient, ChatClient, ChatError, Envelope};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

async fn start_broker() -> RunningBroker {
    broker::start("127.0.0.1:0", "127.0.0.1:0", "guest", "guest")
        .await
        .unwrap()
}

fn admin_client(broker: &RunningBroker) -> AdminClient {
    AdminClient::new("127.0.0.1", broker.admin_addr.port(), "/", "guest", "guest").unwrap()
}

/// A chat client whose inbound deliveries are captured on a channel
/// instead of rendered.
async fn capture_client(
    broker: &RunningBroker,
) -> (ChatClient, mpsc::UnboundedReceiver<Envelope>) {
    let conn = BrokerConnection::connect(broker.addr).await.unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let client = ChatClient::with_callback(conn, admin_client(broker), move |_state| {
        Arc::new(move |payload: Vec<u8>| {
            if let Ok(envelope) = Envelope::decode(&payload) {
                let _ = tx.send(envelope);
            }
        })
    });
    (client, rx)
}

async fn next_envelope(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("delivery channel closed")
}

/// Declare both of a user's queues without running a client, so the user
/// "exists" from the directory's point of view.
async fn provision_user(broker: &RunningBroker, name: &str) {
    let conn = BrokerConnection::connect(broker.addr).await.unwrap();
    let channel = conn.channel();
    channel
        .declare_queue(&format!("chat.text.{name}"), true)
        .await
        .unwrap();
    channel
        .declare_queue(&format!("chat.file.{name}"), true)
        .await
        .unwrap();
    channel.close();
}

#[tokio::test]
async fn login_makes_the_user_visible() {
    let broker = start_broker().await;
    let (alice, _rx) = capture_client(&broker).await;

    assert!(!alice.directory().user_exists("alice").await);
    alice.login("alice").await.unwrap();

    assert!(alice.directory().user_exists("alice").await);
    assert!(!alice.directory().user_exists("ghost").await);
    assert!(matches!(
        alice.login("alice").await,
        Err(ChatError::AlreadyLoggedIn)
    ));
}

#[tokio::test]
async fn destination_is_mutually_exclusive() {
    let broker = start_broker().await;
    let (alice, _rx) = capture_client(&broker).await;
    alice.login("alice").await.unwrap();
    provision_user(&broker, "bob").await;

    alice.set_destination("bob", false).await.unwrap();
    let snapshot = alice.snapshot();
    assert_eq!(snapshot.dest_user, "bob");
    assert!(snapshot.dest_group.is_empty());

    alice.create_group("team").await.unwrap();
    let snapshot = alice.snapshot();
    assert!(snapshot.dest_user.is_empty());
    assert_eq!(snapshot.dest_group, "team");

    alice.set_destination("bob", false).await.unwrap();
    let snapshot = alice.snapshot();
    assert_eq!(snapshot.dest_user, "bob");
    assert!(snapshot.dest_group.is_empty());
}

#[tokio::test]
async fn destination_validation() {
    let broker = start_broker().await;
    let (alice, _rx) = capture_client(&broker).await;
    alice.login("alice").await.unwrap();

    assert!(matches!(
        alice.set_destination("  ", false).await,
        Err(ChatError::EmptyDestination)
    ));
    assert!(matches!(
        alice.set_destination("alice", false).await,
        Err(ChatError::SelfDestination)
    ));
    assert!(matches!(
        alice.set_destination("nobody", false).await,
        Err(ChatError::UnknownUser)
    ));
    assert!(matches!(
        alice.set_destination("nowhere", true).await,
        Err(ChatError::UnknownGroup)
    ));
    assert!(!alice.has_destination());
}

#[tokio::test]
async fn group_creation_and_deletion_are_checked() {
    let broker = start_broker().await;
    let (alice, _rx) = capture_client(&broker).await;
    alice.login("alice").await.unwrap();

    alice.create_group("team").await.unwrap();
    assert!(matches!(
        alice.create_group("team").await,
        Err(ChatError::GroupAlreadyExists)
    ));

    alice.delete_group("team").await.unwrap();
    assert!(matches!(
        alice.delete_group("team").await,
        Err(ChatError::UnknownGroup)
    ));
}

#[tokio::test]
async fn membership_follows_bindings() {
    let broker = start_broker().await;
    let (alice, _rx) = capture_client(&broker).await;
    alice.login("alice").await.unwrap();
    provision_user(&broker, "bob").await;

    alice.create_group("team").await.unwrap();
    alice.add_member("bob", "team").await.unwrap();

    let members = alice.directory().list_group_members("team").await.unwrap();
    let names: Vec<&str> = members.iter().map(String::as_str).collect();
    assert_eq!(names, vec!["alice", "bob"]);

    alice.remove_member("bob", "team").await.unwrap();
    let members = alice.directory().list_group_members("team").await.unwrap();
    assert!(members.contains("alice"));
    assert!(!members.contains("bob"));

    assert!(matches!(
        alice.add_member("nobody", "team").await,
        Err(ChatError::UnknownUser)
    ));
    assert!(matches!(
        alice.add_member("bob", "nowhere").await,
        Err(ChatError::UnknownGroup)
    ));
}

#[tokio::test]
async fn list_groups_reflects_membership() {
    let broker = start_broker().await;
    let (alice, _rx) = capture_client(&broker).await;
    let (bob, _bob_rx) = capture_client(&broker).await;
    alice.login("alice").await.unwrap();
    bob.login("bob").await.unwrap();

    alice.create_group("team").await.unwrap();
    alice.create_group("lobby").await.unwrap();
    alice.add_member("bob", "team").await.unwrap();

    let alice_groups = alice.directory().list_user_groups("alice").await.unwrap();
    assert!(alice_groups.contains("team"));
    assert!(alice_groups.contains("lobby"));

    let bob_groups = bob.directory().list_user_groups("bob").await.unwrap();
    assert!(bob_groups.contains("team"));
    assert!(!bob_groups.contains("lobby"));

    bob.leave_group("team").await.unwrap();
    let bob_groups = bob.directory().list_user_groups("bob").await.unwrap();
    assert!(bob_groups.is_empty());
}

#[tokio::test]
async fn send_text_requires_a_destination() {
    let broker = start_broker().await;
    let (alice, _rx) = capture_client(&broker).await;
    alice.login("alice").await.unwrap();

    assert!(matches!(
        alice.send_text("hello?").await,
        Err(ChatError::NoDestination)
    ));
}

#[tokio::test]
async fn direct_text_reaches_the_destination_user() {
    let broker = start_broker().await;
    let (alice, _alice_rx) = capture_client(&broker).await;
    let (bob, mut bob_rx) = capture_client(&broker).await;
    alice.login("alice").await.unwrap();
    bob.login("bob").await.unwrap();

    alice.set_destination("bob", false).await.unwrap();
    alice.send_text("hi bob").await.unwrap();

    let envelope = next_envelope(&mut bob_rx).await;
    assert_eq!(envelope.sender.as_deref(), Some("alice"));
    assert!(envelope.group.is_none());
    assert!(envelope.file.is_none());
    assert_eq!(envelope.body_text(), "hi bob");
    assert_eq!(envelope.datetime.len(), 19);
}

#[tokio::test]
async fn group_text_fans_out_with_the_group_tag() {
    let broker = start_broker().await;
    let (alice, _alice_rx) = capture_client(&broker).await;
    let (bob, mut bob_rx) = capture_client(&broker).await;
    alice.login("alice").await.unwrap();
    bob.login("bob").await.unwrap();

    alice.create_group("team").await.unwrap();
    alice.add_member("bob", "team").await.unwrap();
    alice.send_text("hello team").await.unwrap();

    let envelope = next_envelope(&mut bob_rx).await;
    assert_eq!(envelope.sender.as_deref(), Some("alice"));
    assert_eq!(envelope.group.as_deref(), Some("team"));
    assert_eq!(envelope.body_text(), "hello team");
}

#[tokio::test]
async fn file_send_delivers_and_notifies_the_sender() {
    let broker = start_broker().await;
    let (alice, mut alice_rx) = capture_client(&broker).await;
    let (bob, mut bob_rx) = capture_client(&broker).await;
    alice.login("alice").await.unwrap();
    bob.login("bob").await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.txt");
    std::fs::write(&path, b"file body").unwrap();

    alice.set_destination("bob", false).await.unwrap();
    alice.send_file(path.to_str().unwrap()).await.unwrap();

    let delivered = next_envelope(&mut bob_rx).await;
    assert_eq!(delivered.sender.as_deref(), Some("alice"));
    assert_eq!(delivered.body, b"file body");
    let meta = delivered.file.expect("file metadata present");
    assert_eq!(meta.filename, "hello.txt");
    assert_eq!(meta.mime, "text/plain");

    // Completion is reported as a system notice on alice's own text queue.
    let notice = next_envelope(&mut alice_rx).await;
    assert!(notice.sender.is_none());
    assert_eq!(notice.body_text(), "File hello.txt was sent to user=bob");
}

#[tokio::test]
async fn file_send_captures_destination_at_call_time() {
    let broker = start_broker().await;
    let (alice, mut alice_rx) = capture_client(&broker).await;
    let (bob, mut bob_rx) = capture_client(&broker).await;
    let (carol, mut carol_rx) = capture_client(&broker).await;
    alice.login("alice").await.unwrap();
    bob.login("bob").await.unwrap();
    carol.login("carol").await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    std::fs::write(&path, b"{}").unwrap();

    alice.set_destination("bob", false).await.unwrap();
    alice.send_file(path.to_str().unwrap()).await.unwrap();
    // Retarget immediately; the in-flight send must still go to bob.
    alice.set_destination("carol", false).await.unwrap();

    let delivered = next_envelope(&mut bob_rx).await;
    assert_eq!(delivered.file.unwrap().filename, "data.json");

    let notice = next_envelope(&mut alice_rx).await;
    assert_eq!(notice.body_text(), "File data.json was sent to user=bob");

    assert!(
        tokio::time::timeout(Duration::from_millis(200), carol_rx.recv())
            .await
            .is_err(),
        "carol must not receive the retargeted send"
    );
}

#[tokio::test]
async fn send_file_validates_the_path() {
    let broker = start_broker().await;
    let (alice, _rx) = capture_client(&broker).await;
    alice.login("alice").await.unwrap();
    provision_user(&broker, "bob").await;
    alice.set_destination("bob", false).await.unwrap();

    assert!(matches!(
        alice.send_file("/no/such/file.txt").await,
        Err(ChatError::FileNotFound)
    ));

    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        alice.send_file(dir.path().to_str().unwrap()).await,
        Err(ChatError::NotRegularFile)
    ));

    let odd = dir.path().join("mystery");
    std::fs::write(&odd, b"?").unwrap();
    assert!(matches!(
        alice.send_file(odd.to_str().unwrap()).await,
        Err(ChatError::ProbeFailed)
    ));
}

#[tokio::test]
async fn logout_releases_consumers_and_login_reattaches() {
    let broker = start_broker().await;
    let (alice, mut alice_rx) = capture_client(&broker).await;
    let (bob, _bob_rx) = capture_client(&broker).await;
    alice.login("alice").await.unwrap();
    bob.login("bob").await.unwrap();

    bob.set_destination("alice", false).await.unwrap();
    bob.send_text("first").await.unwrap();
    assert_eq!(next_envelope(&mut alice_rx).await.body_text(), "first");

    alice.logout().await.unwrap();
    assert!(matches!(alice.logout().await, Err(ChatError::NotLoggedIn)));
    assert!(!alice.is_logged_in());

    // The durable queue outlives the session; this probe also round-trips
    // on alice's connection, so the channel release has been processed.
    assert!(alice.directory().user_exists("alice").await);

    // With no consumer attached the message waits in the queue.
    bob.send_text("second").await.unwrap();
    assert!(
        tokio::time::timeout(Duration::from_millis(200), alice_rx.recv())
            .await
            .is_err()
    );

    alice.login("alice").await.unwrap();
    assert_eq!(next_envelope(&mut alice_rx).await.body_text(), "second");
}
