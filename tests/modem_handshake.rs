use std::time::Duration;

use retrobbs::gateway::modem::{Modem, ModemState};
use retrobbs::gateway::relay::RelayEnd;
use retrobbs::gateway::GatewayError;
use tokio::sync::mpsc;
use tokio::time::timeout;
mod common;

fn modem(connect_timeout: Duration) -> (Modem, mpsc::Sender<Vec<u8>>, common::Recorder) {
    let (tx, rx) = mpsc::channel(16);
    let recorder = common::Recorder::default();
    let mut modem = Modem::with_io(
        common::quick_modem_config(),
        rx,
        Box::new(recorder.clone()),
    );
    modem.set_connect_timeout(connect_timeout);
    (modem, tx, recorder)
}

#[tokio::test]
async fn noise_then_ring_answers_exactly_once() {
    let (mut modem, tx, recorder) = modem(Duration::from_millis(200));
    tx.send(b"noise\r\n".to_vec()).await.unwrap();
    tx.send(b"RING\r\n".to_vec()).await.unwrap();

    modem.wait_ring().await.unwrap();
    assert_eq!(modem.state(), ModemState::RingDetected);

    // No CONNECT ever arrives: back to Idle with exactly one ATA and one ATH.
    let result = modem.answer().await;
    assert!(matches!(result, Err(GatewayError::HandshakeTimeout(_))));
    assert_eq!(modem.state(), ModemState::Idle);
    assert_eq!(recorder.count("ATA\r"), 1);
    assert_eq!(recorder.count("ATH\r"), 1);
    assert_eq!(recorder.text(), "ATA\rATH\r");
}

#[tokio::test]
async fn initialize_sends_init_string() {
    let (mut modem, _tx, recorder) = modem(Duration::from_millis(200));
    modem.initialize().await.unwrap();
    assert_eq!(recorder.text(), "ATE0\r");
    assert_eq!(modem.state(), ModemState::Idle);
}

// A whole call: RING, CONNECT, data both ways, NO CARRIER, guarded hang-up.
#[tokio::test]
async fn full_call_until_no_carrier() {
    let (mut modem, tx, recorder) = modem(Duration::from_secs(5));
    let (terminal, mut process) = common::fake_terminal();

    tx.send(b"RING\r\n".to_vec()).await.unwrap();
    tx.send(b"CONNECT 2400\r\n".to_vec()).await.unwrap();
    tx.send(b"guest\r".to_vec()).await.unwrap();
    tx.send(b"\r\nNO CARRIER\r\n".to_vec()).await.unwrap();
    process.output.send(b"Name: ".to_vec()).await.unwrap();

    let end = timeout(Duration::from_secs(5), modem.serve_call(move || async move { Ok(terminal) }))
        .await
        .expect("call did not finish")
        .unwrap();

    assert_eq!(end, RelayEnd::Carrier);
    assert_eq!(modem.state(), ModemState::Idle);
    assert_eq!(process.close_count(), 1);
    assert!(process.drain_input().starts_with(b"guest\r"));

    let written = recorder.text();
    assert!(written.starts_with("ATA\r"));
    assert!(written.ends_with("+++ATH\r"));
    // Depending on scheduling the prompt may or may not have reached the line
    // before the carrier dropped, but never after the hang-up.
    assert!(written.find("Name: ").map_or(true, |at| at < written.find("+++").unwrap()));
}

#[tokio::test]
async fn failed_session_open_still_hangs_up() {
    let (mut modem, tx, recorder) = modem(Duration::from_secs(5));
    tx.send(b"RING\r\nCONNECT\r\n".to_vec()).await.unwrap();

    let result = modem
        .serve_call(|| async {
            Err::<common::FakeTerminal, _>(GatewayError::Pty("no ptys left".into()))
        })
        .await;

    assert!(matches!(result, Err(GatewayError::Pty(_))));
    assert_eq!(modem.state(), ModemState::Idle);
    assert_eq!(recorder.text(), "ATA\r+++ATH\r");
}
