use ctf_shared::config::GameModeConfig;
use ctf_shared::protocol::{
    EngineEvent, FlagId, GameEvent, MatchSnapshot, PlayerId, WelcomeMsg,
};
use ctf_shared::vec3::Vec3;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::engine::EngineSink;
use crate::flag::DropTicket;
use crate::raycast::Raycaster;
use crate::state::GameState;

/// Commands into the game loop, from the engine bridge and from the tasks the
/// loop spawns (throws, timers).
#[derive(Debug)]
pub enum GameCommand {
    EngineAttached {
        response: oneshot::Sender<WelcomeMsg>,
    },
    EngineDetached,
    Engine(EngineEvent),
    FlagLanded {
        flag_id: FlagId,
        ticket: DropTicket,
        previous_carrier: PlayerId,
        position: Vec3,
    },
    PickupDelayElapsed {
        flag_id: FlagId,
        ticket: DropTicket,
    },
    AutoReturnDue {
        flag_id: FlagId,
        ticket: DropTicket,
    },
    Snapshot {
        response: oneshot::Sender<MatchSnapshot>,
    },
}

/// Run the game loop. Owns all match state and the raycast queue.
///
/// `cmd_tx` is a weak handle to the loop's own command channel, used by
/// spawned tasks to report back. The loop ends when every strong sender is gone.
pub async fn run_game_loop(
    mut cmd_rx: mpsc::Receiver<GameCommand>,
    cmd_tx: mpsc::WeakSender<GameCommand>,
    event_tx: broadcast::Sender<GameEvent>,
    sink: EngineSink,
    config: GameModeConfig,
) {
    let (raycaster, mut cast_rx) = Raycaster::channel();
    let mut state = GameState::new(config, sink, raycaster, event_tx, cmd_tx);

    loop {
        tokio::select! {
            Some(call) = cast_rx.recv() => {
                state.submit_cast(call);
            }

            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    break;
                };
                match cmd {
                    GameCommand::EngineAttached { response } => {
                        let _ = response.send(state.welcome());
                        state.start_match();
                        tracing::info!("Engine attached");
                    }
                    GameCommand::EngineDetached => {
                        state.engine_detached();
                        tracing::info!("Engine detached");
                    }
                    GameCommand::Engine(event) => state.handle_engine_event(event),
                    GameCommand::FlagLanded {
                        flag_id,
                        ticket,
                        previous_carrier,
                        position,
                    } => {
                        state.on_flag_landed(flag_id, ticket, previous_carrier, position);
                    }
                    GameCommand::PickupDelayElapsed { flag_id, ticket } => {
                        state.on_pickup_delay_elapsed(flag_id, ticket);
                    }
                    GameCommand::AutoReturnDue { flag_id, ticket } => {
                        state.on_auto_return_due(flag_id, ticket);
                    }
                    GameCommand::Snapshot { response } => {
                        let _ = response.send(state.snapshot());
                    }
                }
            }
        }
    }

    tracing::info!("Game loop ended");
}
