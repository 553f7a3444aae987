use crate::auth::CurrentUser;
use crate::realtime::{ClientEvent, RealtimeHub};
use rocket::futures::{SinkExt, StreamExt};
use rocket::{State, get};
use rocket_ws::{Channel, Message, WebSocket};
use std::sync::Arc;

/// Websocket endpoint of the realtime hub. Frames are JSON `{"event", "data"}` objects.
///
/// The session cookies of the upgrade request, when present, name the only user the
/// connection may later authenticate as (with `realtime.require_session`).
#[get("/realtime")]
pub fn realtime(ws: WebSocket, hub: &State<Arc<RealtimeHub>>, current_user: Option<CurrentUser>) -> Channel<'static> {
    let hub = Arc::clone(hub.inner());
    let session_user = current_user.map(|user| user.id);

    ws.channel(move |stream| {
        Box::pin(async move {
            let (connection_id, mut events) = hub.connect(session_user).await;
            let (mut sink, mut incoming) = stream.split();

            let send_task = tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    let frame = match serde_json::to_string(&event) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to encode realtime event");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(frame)).await.is_err() {
                        tracing::debug!(connection_id = %connection_id, "websocket sink closed");
                        break;
                    }
                }
            });

            while let Some(result) = incoming.next().await {
                match result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => hub.handle(connection_id, event).await,
                        Err(e) => {
                            tracing::debug!(connection_id = %connection_id, error = %e, "unparseable realtime frame");
                            hub.send_error(&connection_id, "Invalid event").await;
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(connection_id = %connection_id, error = %e, "websocket receive error");
                        break;
                    }
                }
            }

            hub.disconnect(connection_id).await;
            send_task.abort();
            Ok(())
        })
    })
}

pub fn routes() -> Vec<rocket::Route> {
    rocket::routes![realtime]
}
