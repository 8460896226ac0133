//! Message paths. Each concern owns exactly one path; status replies travel back on the
//! path of the command that caused them.

pub const CONNECT: &str = "/media/connect";
pub const DISCONNECT: &str = "/media/disconnect";

pub const PLAY: &str = "/media/play";
pub const PAUSE: &str = "/media/pause";
pub const NEXT: &str = "/media/next";
pub const PREVIOUS: &str = "/media/previous";
pub const PLAY_FROM_SEARCH: &str = "/media/play_from_search";

pub const VOLUME_UP: &str = "/media/volume_up";
pub const VOLUME_DOWN: &str = "/media/volume_down";
pub const VOLUME_SET: &str = "/media/volume_set";
pub const VOLUME_STATUS: &str = "/media/volume_status";

pub const ACTION_CLICK: &str = "/media/action_click";
pub const QUEUE_ITEM_CLICK: &str = "/media/queue_item_click";
pub const BROWSE_ITEM_CLICK: &str = "/media/browse_item_click";
pub const BROWSE_BACK: &str = "/media/browse_back";

pub const PLAYER_STATE: &str = "/media/player_state";
pub const PLAYER_APP_INFO: &str = "/media/player_app_info";
pub const ARTWORK: &str = "/media/artwork";
pub const ACTIONS_LIST: &str = "/media/actions_list";
pub const QUEUE_LIST: &str = "/media/queue_list";
pub const BROWSE_LIST: &str = "/media/browse_list";
pub const APP_LIST: &str = "/media/app_list";

/// Paths the phone accepts commands on.
pub const COMMAND_PATHS: &[&str] = &[
    CONNECT,
    DISCONNECT,
    PLAY,
    PAUSE,
    NEXT,
    PREVIOUS,
    PLAY_FROM_SEARCH,
    VOLUME_UP,
    VOLUME_DOWN,
    VOLUME_SET,
    VOLUME_STATUS,
    ACTION_CLICK,
    QUEUE_ITEM_CLICK,
    BROWSE_ITEM_CLICK,
    BROWSE_BACK,
];

/// Paths kept as last-known values in the replicated data store. A deleted item is
/// a tombstone.
pub const REPLICATED_PATHS: &[&str] = &[
    PLAYER_STATE,
    PLAYER_APP_INFO,
    ARTWORK,
    ACTIONS_LIST,
    QUEUE_LIST,
    BROWSE_LIST,
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn paths_are_distinct() {
        let all: Vec<&str> = COMMAND_PATHS
            .iter()
            .chain(REPLICATED_PATHS)
            .chain(std::iter::once(&APP_LIST))
            .copied()
            .collect();
        let unique: HashSet<&str> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());
    }
}
