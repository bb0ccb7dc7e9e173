//! Room and challenge timers, driven through the router with paused time.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use duolink::protocol::{ChallengeSolution, ControlMessage, ErrorReason, RoomAvailability};
use duolink::signaling::challenge::{solve, MAX_SOLVE_ITERATIONS};
use duolink::signaling::{
    ChallengeConfig, ChallengeEngine, Connection, PeerSocket, RegistryConfig, RoomRegistry,
    SignalingRouter,
};

struct TestPeer {
    conn: Connection,
    rx: UnboundedReceiver<ControlMessage>,
}

impl TestPeer {
    fn new() -> Self {
        let (socket, rx) = PeerSocket::channel();
        Self {
            conn: Connection::new(socket),
            rx,
        }
    }

    fn next(&mut self) -> ControlMessage {
        self.rx.try_recv().expect("no message queued")
    }

    fn solution(&mut self, router: &SignalingRouter, context: Option<&str>) -> ChallengeSolution {
        router.dispatch(&mut self.conn, ControlMessage::ChallengeRequest);
        let ControlMessage::ChallengeResponse { target, difficulty } = self.next() else {
            panic!("expected a challenge");
        };
        let nonce = solve(&target, difficulty, context, MAX_SOLVE_ITERATIONS).unwrap();
        ChallengeSolution { target, nonce }
    }

    fn create(&mut self, router: &SignalingRouter) -> String {
        let challenge = self.solution(router, None);
        router.dispatch(
            &mut self.conn,
            ControlMessage::CreateRoom {
                room_name: None,
                challenge: Some(challenge),
            },
        );
        match self.next() {
            ControlMessage::RoomCreated { room_id } => room_id,
            other => panic!("expected room_created, got {other:?}"),
        }
    }

    fn join(&mut self, router: &SignalingRouter, room_id: &str) -> ControlMessage {
        let challenge = self.solution(router, Some(room_id));
        router.dispatch(
            &mut self.conn,
            ControlMessage::JoinRoom {
                room_id: room_id.to_string(),
                challenge: Some(challenge),
            },
        );
        self.next()
    }
}

fn router() -> SignalingRouter {
    SignalingRouter::new(
        RoomRegistry::new(RegistryConfig::default()),
        ChallengeEngine::new(ChallengeConfig::default()),
    )
}

#[tokio::test(start_paused = true)]
async fn rejoin_within_grace_keeps_room() {
    let router = router();
    let mut owner = TestPeer::new();
    let room_id = owner.create(&router);

    router.disconnect(&mut owner.conn);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(router.registry().exists(&room_id));

    let mut guest = TestPeer::new();
    assert_eq!(
        guest.join(&router, &room_id),
        ControlMessage::RoomJoined {
            room_id: room_id.clone(),
            participants: 1
        }
    );

    tokio::time::sleep(Duration::from_secs(35)).await;
    assert!(router.registry().exists(&room_id));
    assert_eq!(router.registry().participants(&room_id), Some(1));
}

#[tokio::test(start_paused = true)]
async fn abandoned_room_is_deleted_after_grace() {
    let router = router();
    let mut owner = TestPeer::new();
    let room_id = owner.create(&router);
    router.disconnect(&mut owner.conn);

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert!(router.registry().exists(&room_id));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!router.registry().exists(&room_id));

    let mut late = TestPeer::new();
    assert!(matches!(
        late.join(&router, &room_id),
        ControlMessage::Error {
            reason: ErrorReason::RoomNotFound,
            ..
        }
    ));
    assert_eq!(router.registry().status(&room_id), RoomAvailability::NotFound);
}

#[tokio::test(start_paused = true)]
async fn occupied_room_outlives_grace_period() {
    let router = router();
    let mut owner = TestPeer::new();
    let room_id = owner.create(&router);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert!(router.registry().exists(&room_id));
    assert_eq!(router.registry().participants(&room_id), Some(1));
}

#[tokio::test(start_paused = true)]
async fn leaving_starts_grace_period() {
    let router = router();
    let mut owner = TestPeer::new();
    let mut guest = TestPeer::new();
    let room_id = owner.create(&router);
    guest.join(&router, &room_id);

    router.disconnect(&mut owner.conn);
    router.dispatch(
        &mut guest.conn,
        ControlMessage::LeaveRoom {
            room_id: room_id.clone(),
        },
    );
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(!router.registry().exists(&room_id));
}

#[tokio::test(start_paused = true)]
async fn challenges_expire() {
    let router = router();
    let mut peer = TestPeer::new();
    let challenge = peer.solution(&router, None);
    assert_eq!(router.challenges().outstanding(), 1);

    tokio::time::sleep(Duration::from_secs(91)).await;
    assert_eq!(router.challenges().outstanding(), 0);

    router.dispatch(
        &mut peer.conn,
        ControlMessage::CreateRoom {
            room_name: None,
            challenge: Some(challenge),
        },
    );
    assert!(matches!(
        peer.next(),
        ControlMessage::Error {
            reason: ErrorReason::InvalidChallenge,
            ..
        }
    ));
    assert!(router.registry().is_empty());
}
