//! End-to-end tests of the assembled panel against simulated devices on
//! loopback sockets.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use studio_relay::{
    encode_pan_tilt, force_program_source, Config, ControlPanel, PowerState, PtzScale, RelayError, Result,
    SwitcherCommand, SwitcherDriver, SwitcherEvent, SwitcherSources,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Switcher driver whose events are pushed by the test
struct ScriptedSwitcher {
    events: Mutex<Option<mpsc::UnboundedReceiver<SwitcherEvent>>>,
    commands: Arc<Mutex<Vec<SwitcherCommand>>>,
}

impl ScriptedSwitcher {
    fn new() -> (Arc<Self>, mpsc::UnboundedSender<SwitcherEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Arc::new(Self {
            events: Mutex::new(Some(rx)),
            commands: Arc::new(Mutex::new(Vec::new())),
        });
        (driver, tx)
    }

    fn commands(&self) -> Vec<SwitcherCommand> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl SwitcherDriver for ScriptedSwitcher {
    async fn connect(&self, _address: &str) -> Result<mpsc::UnboundedReceiver<SwitcherEvent>> {
        self.events
            .lock()
            .unwrap()
            .take()
            .ok_or(RelayError::ConnectionClosed)
    }

    async fn send_command(&self, command: SwitcherCommand) -> Result<()> {
        self.commands.lock().unwrap().push(command);
        Ok(())
    }
}

/// VISCA camera on a loopback UDP port; returns the port and every payload it received
async fn simulated_camera(power: bool) -> (u16, Arc<Mutex<Vec<Vec<u8>>>>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    let received = Arc::new(Mutex::new(Vec::new()));
    let log = received.clone();
    tokio::spawn(async move {
        let mut on = power;
        let mut buf = [0u8; 64];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let payload = buf[..n].to_vec();
            let reply = match payload.as_slice() {
                [0x81, 0x09, 0x04, 0x00, 0xff] => vec![0x90, 0x50, if on { 0x02 } else { 0x03 }, 0xff],
                [0x81, 0x01, 0x04, 0x00, state, 0xff] => {
                    on = *state == 0x02;
                    vec![0x90, 0x51, 0xff]
                }
                _ => vec![0x90, 0x51, 0xff],
            };
            log.lock().unwrap().push(payload);
            let _ = socket.send_to(&reply, from).await;
        }
    });
    (port, received)
}

/// Projector control page that always reports power on
async fn simulated_projector() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let mut request = String::new();
                while !["QueryControl", "Power On", "Power Off"].iter().any(|body| request.ends_with(body)) {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.push_str(&String::from_utf8_lossy(&buf[..n])),
                    }
                }
                let page = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<html>\nvar st = {pw:\"1\",src:\"2\"};\n";
                let _ = stream.write_all(page.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    port
}

fn config(camera_port: u16, projector_port: u16) -> Config {
    let text = json!({
        "atemIP": "10.0.0.20",
        "cameras": [
            { "ip": "127.0.0.1", "name": "Wide" },
            { "ip": "127.0.0.1", "name": "Pulpit" }
        ],
        "projectors": [ { "ip": "127.0.0.1", "name": "Left" } ],
        "tallyPins": [],
        "relay": { "responseTimeoutMs": 500, "cameraPort": camera_port, "projectorPort": projector_port }
    });
    Config::from_json(&text.to_string()).unwrap()
}

async fn next_json<S>(read: &mut S) -> Value
where
    S: StreamExt<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        if let Message::Text(text) = read.next().await.unwrap().unwrap() {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn status_surface_reaches_simulated_devices() {
    let (camera_port, received) = simulated_camera(false).await;
    let projector_port = simulated_projector().await;
    let (driver, _events) = ScriptedSwitcher::new();
    let panel = ControlPanel::start(config(camera_port, projector_port), driver, Vec::new())
        .await
        .unwrap();

    let cameras = panel.camera_status().await;
    assert_eq!(cameras["cam-1"].power, PowerState::Off);
    assert_eq!(cameras["cam-2"].power, PowerState::Off);

    assert!(panel.set_camera_power("cam-1", true).await.unwrap());
    assert_eq!(panel.camera_status().await["cam-1"].power, PowerState::On);
    assert!(received.lock().unwrap().contains(&vec![0x81, 0x01, 0x04, 0x00, 0x02, 0xff]));

    assert_eq!(panel.projector_status().await["proj-1"].power, PowerState::On);
    assert!(panel.set_projector_power("proj-1", false).await.unwrap());
    assert!(matches!(
        panel.set_projector_power("proj-2", true).await,
        Err(RelayError::UnknownDevice(_))
    ));

    let roster = panel.device_roster();
    assert_eq!(roster.cameras.len(), 2);
    assert_eq!(roster.projectors[0].name, "Left");
}

#[tokio::test]
async fn observers_follow_the_switcher_and_drive_cameras() {
    let (camera_port, received) = simulated_camera(true).await;
    let (driver, events) = ScriptedSwitcher::new();
    let panel = ControlPanel::start(config(camera_port, 9), driver.clone(), Vec::new())
        .await
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    panel.serve_observers(listener);

    let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    let (mut write, mut read) = ws.split();
    assert_eq!(next_json(&mut read).await["type"], "tally");

    events
        .send(SwitcherEvent::Connected(SwitcherSources::new(Some(2), Some(1))))
        .unwrap();
    loop {
        let message = next_json(&mut read).await;
        if message["data"]["program"] == "cam-1" {
            assert_eq!(message["data"]["preview"], "cam-2");
            break;
        }
    }

    write
        .send(Message::Text(
            json!({ "type": "pantilt", "data": { "id": "cam-2", "speedX": -1.0, "speedY": 0.0 } }).to_string(),
        ))
        .await
        .unwrap();
    let expected = encode_pan_tilt(-1.0, 0.0, PtzScale::default()).to_vec();
    tokio::time::timeout(Duration::from_secs(2), async {
        while !received.lock().unwrap().contains(&expected) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    panel.fade_to_source(2).await.unwrap();
    assert_eq!(
        driver.commands(),
        vec![
            SwitcherCommand::SetPreview { mix_effect: 0, source: 2 },
            SwitcherCommand::AutoTransition { mix_effect: 0 },
        ]
    );
}

#[tokio::test]
async fn force_program_source_cuts_once_the_link_is_up() {
    let (driver, events) = ScriptedSwitcher::new();
    let sender = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        events.send(SwitcherEvent::Connected(SwitcherSources::default())).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    force_program_source(driver.clone(), "10.0.0.20", 3, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(
        driver.commands().first(),
        Some(&SwitcherCommand::SetPreview { mix_effect: 0, source: 3 })
    );
    sender.abort();
}
