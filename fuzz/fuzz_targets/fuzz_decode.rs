#![no_main]

use chess_sync_client::codec;
use chess_sync_client::protocol::ServerMessage;
use chess_sync_client::SessionCore;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Anything that decodes must be safe to feed to a session in any state.
    if let Ok(message) = codec::decode(text) {
        let now = std::time::Instant::now();
        let mut idle = SessionCore::new();
        let _ = idle.handle_server_message(message.clone(), now);

        let mut waiting = SessionCore::new();
        let _ = waiting.new_game();
        let _ = waiting.handle_server_message(message.clone(), now);

        let mut watching = SessionCore::new();
        let _ = watching.spectate("fuzz");
        let _ = watching.handle_server_message(message, now);
        let _ = watching.view(now);
    }

    let _ = serde_json::from_str::<ServerMessage>(text);
});
