use std::sync::Arc;

use streamspeech_config::Settings;
use streamspeech_streaming::StreamingController;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub streamer: Arc<StreamingController>,
}
