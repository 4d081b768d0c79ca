//! End-to-end tests over loopback TCP: a fake game, a match manager and one
//! agent talking to a real server.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use agent_bridge::core::framing::{encode, write_message, FrameReader};
use agent_bridge::core::math::BoxShape;
use agent_bridge::game::config::{MatchConfiguration, PlayerClass, PlayerConfiguration, ScriptConfiguration};
use agent_bridge::game::external::{BallisticPredictor, JsonConfigProvider, LaunchError, ProcessLauncher};
use agent_bridge::game::update::{CarSpawn, GameUpdate, UpdateBatch};
use agent_bridge::network::game_protocol::{GameCommand, GameInbound, GameOutbound};
use agent_bridge::network::protocol::{
    ClientMessage, ConnectionSettings, ControllerState, PlayerInput, ServerMessage,
};
use agent_bridge::{AgentServer, ServerConfig, Services};

async fn within<T>(future: impl Future<Output = T>) -> T {
    timeout(Duration::from_secs(5), future).await.expect("timed out")
}

struct GameAlreadyRunning;

impl ProcessLauncher for GameAlreadyRunning {
    fn launch_game(&mut self, _config: &MatchConfiguration) -> Result<(), LaunchError> {
        Ok(())
    }
    fn launch_bot(&mut self, _player: &PlayerConfiguration) -> Result<(), LaunchError> {
        Ok(())
    }
    fn launch_script(&mut self, _script: &ScriptConfiguration) -> Result<(), LaunchError> {
        Ok(())
    }
    fn is_game_running(&self) -> bool {
        true
    }
}

struct Peer {
    frames: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Peer {
    fn new(stream: TcpStream) -> Self {
        let (read, writer) = stream.into_split();
        Self { frames: FrameReader::new(read), writer }
    }

    async fn connect(addr: SocketAddr) -> Self {
        Self::new(TcpStream::connect(addr).await.unwrap())
    }

    async fn send(&mut self, message: ClientMessage) {
        write_message(&mut self.writer, &message).await.unwrap();
    }

    /// Read server messages until `pick` accepts one.
    async fn wait_for<T>(&mut self, mut pick: impl FnMut(ServerMessage) -> Option<T>) -> T {
        within(async {
            loop {
                match self.frames.next_message::<ServerMessage>().await.unwrap() {
                    Some(message) => {
                        if let Some(found) = pick(message) {
                            return found;
                        }
                    }
                    None => panic!("server closed the connection"),
                }
            }
        })
        .await
    }

    /// Read game commands until `pick` accepts one.
    async fn wait_for_command<T>(&mut self, mut pick: impl FnMut(&GameCommand) -> Option<T>) -> T {
        within(async {
            loop {
                match self.frames.next_message::<GameOutbound>().await.unwrap() {
                    Some(GameOutbound::Commands(batch)) => {
                        if let Some(found) = batch.commands.iter().find_map(&mut pick) {
                            return found;
                        }
                    }
                    None => panic!("bridge closed the connection"),
                }
            }
        })
        .await
    }

    async fn send_updates(&mut self, updates: Vec<GameUpdate>) {
        write_message(&mut self.writer, &GameInbound::Updates(UpdateBatch::new(updates)))
            .await
            .unwrap();
    }
}

fn one_bot_match() -> MatchConfiguration {
    MatchConfiguration {
        auto_start_agents: true,
        wait_for_agents: true,
        player_configurations: vec![PlayerConfiguration {
            variety: PlayerClass::CustomBot,
            name: "Striker".to_string(),
            team: 0,
            root_dir: String::new(),
            run_command: String::new(),
            loadout: None,
            spawn_id: 0,
            agent_id: "team/striker".to_string(),
            hivemind: false,
        }],
        ..MatchConfiguration::default()
    }
}

#[tokio::test]
async fn test_match_flow_end_to_end() {
    let game_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ServerConfig {
        agent_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        game_addr: game_listener.local_addr().unwrap(),
        game_retry_interval: Duration::from_millis(10),
        ..ServerConfig::default()
    };
    let services = Services {
        launcher: Box::new(GameAlreadyRunning),
        predictor: Box::new(BallisticPredictor::default()),
        provider: Box::new(JsonConfigProvider),
    };
    let server = AgentServer::bind(config, services).await.unwrap();
    let agent_addr = server.local_addr().unwrap();
    let server_task = tokio::spawn(server.run());

    let (game_stream, _) = within(game_listener.accept()).await.unwrap();
    let mut game = Peer::new(game_stream);

    // match manager starts the match
    let mut manager = Peer::connect(agent_addr).await;
    manager.send(ClientMessage::ConnectionSettings(ConnectionSettings::default())).await;
    manager.send(ClientMessage::MatchConfiguration(Box::new(one_bot_match()))).await;

    let accepted = manager
        .wait_for(|m| match m {
            ServerMessage::MatchConfiguration(config) => Some(config),
            _ => None,
        })
        .await;
    let spawn_id = accepted.player_configurations[0].spawn_id;
    assert_ne!(spawn_id, 0);

    game.wait_for_command(|c| matches!(c, GameCommand::OpenMatch { .. }).then_some(())).await;
    game.send_updates(vec![GameUpdate::MatchInfo { gravity_z: -650.0, game_speed: 1.0 }]).await;

    // the agent claims its car and reports ready; only then does the bot spawn
    let mut agent = Peer::connect(agent_addr).await;
    agent
        .send(ClientMessage::ConnectionSettings(ConnectionSettings {
            agent_id: "team/striker".to_string(),
            close_between_matches: true,
            ..ConnectionSettings::default()
        }))
        .await;
    let controllables = agent
        .wait_for(|m| match m {
            ServerMessage::ControllableTeamInfo(info) => Some(info),
            _ => None,
        })
        .await;
    assert_eq!(controllables.team, 0);
    assert_eq!(controllables.controllables.len(), 1);
    assert_eq!(controllables.controllables[0].index, 0);
    assert_eq!(controllables.controllables[0].spawn_id, spawn_id);

    agent.send(ClientMessage::InitComplete).await;
    let command_id = game
        .wait_for_command(|c| match c {
            GameCommand::SpawnBot { command_id, name, .. } if name == "Striker" => Some(*command_id),
            _ => None,
        })
        .await;

    game.send_updates(vec![GameUpdate::CarSpawn(CarSpawn {
        actor_id: 501,
        command_id: Some(command_id),
        name: "Striker".to_string(),
        team: 0,
        hitbox: BoxShape::default(),
    })])
    .await;

    let packet = agent
        .wait_for(|m| match m {
            ServerMessage::GamePacket(packet) if !packet.players.is_empty() => Some(packet),
            _ => None,
        })
        .await;
    assert_eq!(packet.players[0].index, 0);
    assert_eq!(packet.players[0].car.spawn_id, spawn_id);

    // input reaches the car through the bridge
    let controller = ControllerState { throttle: 1.0, boost: true, ..ControllerState::default() };
    agent
        .send(ClientMessage::PlayerInput(PlayerInput { player_index: 0, controller }))
        .await;
    let (actor, sent) = game
        .wait_for_command(|c| match c {
            GameCommand::SetInput { actor_id, controller } => Some((*actor_id, *controller)),
            _ => None,
        })
        .await;
    assert_eq!(actor, 501);
    assert_eq!(sent, controller);

    // stopping with shutdown ends the match and closes everyone
    manager.send(ClientMessage::StopCommand { shutdown_server: true }).await;
    game.wait_for_command(|c| (*c == GameCommand::EndMatch).then_some(())).await;
    agent
        .wait_for(|m| matches!(m, ServerMessage::DisconnectSignal).then_some(()))
        .await;

    assert!(within(server_task).await.unwrap().is_ok());
}

#[tokio::test]
async fn test_game_loss_stops_server() {
    let game_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ServerConfig {
        agent_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        game_addr: game_listener.local_addr().unwrap(),
        game_retry_interval: Duration::from_millis(10),
        ..ServerConfig::default()
    };
    let services = Services {
        launcher: Box::new(GameAlreadyRunning),
        predictor: Box::new(BallisticPredictor::default()),
        provider: Box::new(JsonConfigProvider),
    };
    let server = AgentServer::bind(config, services).await.unwrap();
    let agent_addr = server.local_addr().unwrap();
    let server_task = tokio::spawn(server.run());

    let (game_stream, _) = within(game_listener.accept()).await.unwrap();

    let mut manager = Peer::connect(agent_addr).await;
    manager.send(ClientMessage::ConnectionSettings(ConnectionSettings::default())).await;
    // make sure the session is established before the game goes away
    manager.send(ClientMessage::MatchConfiguration(Box::new(one_bot_match()))).await;
    manager
        .wait_for(|m| matches!(m, ServerMessage::MatchConfiguration(_)).then_some(()))
        .await;

    drop(game_stream);

    manager
        .wait_for(|m| matches!(m, ServerMessage::DisconnectSignal).then_some(()))
        .await;
    assert!(within(server_task).await.unwrap().is_err());
}

#[tokio::test]
async fn test_frames_reassemble_across_writes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let writer = tokio::spawn(async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let first = encode(&ClientMessage::InitComplete).unwrap();
        let second = encode(&ClientMessage::StopCommand { shutdown_server: false }).unwrap();

        // one byte at a time, then the second frame and half of a third
        for byte in first.iter() {
            stream.write_all(&[*byte]).await.unwrap();
            stream.flush().await.unwrap();
        }
        stream.write_all(&second).await.unwrap();
        stream.write_all(&second[..3]).await.unwrap();
    });

    let (stream, _) = within(listener.accept()).await.unwrap();
    let mut frames = FrameReader::new(stream);

    assert_eq!(
        within(frames.next_message::<ClientMessage>()).await.unwrap(),
        Some(ClientMessage::InitComplete)
    );
    assert_eq!(
        within(frames.next_message::<ClientMessage>()).await.unwrap(),
        Some(ClientMessage::StopCommand { shutdown_server: false })
    );

    writer.await.unwrap();
    // the dangling partial frame reads as a clean end of stream
    assert_eq!(within(frames.next_message::<ClientMessage>()).await.unwrap(), None);
}
