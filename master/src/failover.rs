use std::collections::BTreeMap;

use tracing::{info, warn};

use common::{DispatchError, WorkerId};

use crate::state::{RunState, Slot, SlotState};

/// Saca de servicio un worker que ya no responde (terminó o no acepta
/// escrituras). Si tenía un job en vuelo lo devuelve al final de la cola
/// con el mismo número de intento: falló el worker, no el job.
pub fn retire(worker: WorkerId, slot: &mut Slot, state: &mut RunState) {
    slot.state = SlotState::Exited;

    if let Some(inflight) = slot.in_flight.take() {
        info!(
            "reencolando {} (attempt={}) por caída del worker {}",
            inflight.ticket.url(),
            inflight.ticket.attempt,
            worker
        );
        state.requeue(inflight.ticket);
    }
}

/// Falla rápido si quedan jobs y ningún worker los va a poder tomar.
///
/// Sólo un worker ocupado (agendado o esperando respuesta) vuelve a pedir
/// trabajo; los cerrados o terminados ya no.
pub fn ensure_capacity(
    slots: &BTreeMap<WorkerId, Slot>,
    state: &RunState,
) -> Result<(), DispatchError> {
    if state.is_finished() {
        return Ok(());
    }

    if slots.values().any(|s| s.state.is_busy()) {
        return Ok(());
    }

    warn!(
        "sin workers sanos: {} job(s) en cola y ninguno puede tomarlos",
        state.queue.len()
    );
    Err(DispatchError::NoHealthyWorkers {
        remaining: state.remaining(),
    })
}
