use bytes::Bytes;
use media_proto::{
    ActionSet, AppInfo, BrowseList, PlayerSnapshot, QueueSnapshot, Status, VolumeStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Player,
    CustomActions,
    Browse,
    Queue,
}

/// Which pages the wear UI offers. The player page is always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagerState {
    pub pages: Vec<Page>,
}

impl PagerState {
    pub fn compose(actions: bool, browse: bool, queue: bool) -> Self {
        let mut pages = vec![Page::Player];
        if actions {
            pages.push(Page::CustomActions);
        }
        if browse {
            pages.push(Page::Browse);
        }
        if queue {
            pages.push(Page::Queue);
        }
        Self { pages }
    }

    pub fn contains(&self, page: Page) -> bool {
        self.pages.contains(&page)
    }
}

impl Default for PagerState {
    fn default() -> Self {
        Self::compose(false, false, false)
    }
}

/// Last status reply received from the phone and the command path it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReply {
    pub path: String,
    pub status: Status,
}

/// Locally reconstructed view of the phone's media session.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorState {
    pub player: PlayerSnapshot,
    pub artwork: Option<Bytes>,
    pub app: Option<AppInfo>,
    pub volume: Option<VolumeStatus>,
    pub actions: Option<ActionSet>,
    pub queue: Option<QueueSnapshot>,
    pub browse: Option<BrowseList>,
    pub apps: Vec<AppInfo>,
    pub last_reply: Option<StatusReply>,
    pub pager: PagerState,
}

impl Default for MirrorState {
    fn default() -> Self {
        Self {
            player: PlayerSnapshot::cleared(),
            artwork: None,
            app: None,
            volume: None,
            actions: None,
            queue: None,
            browse: None,
            apps: Vec::new(),
            last_reply: None,
            pager: PagerState::default(),
        }
    }
}

impl MirrorState {
    pub fn is_displaying(&self) -> bool {
        !self.player.is_cleared()
    }

    /// Pager the current collections call for; applied after the pager debounce.
    pub fn desired_pager(&self) -> PagerState {
        PagerState::compose(
            self.actions.as_ref().is_some_and(|a| !a.is_empty()),
            self.browse.as_ref().is_some_and(|b| !b.items.is_empty()),
            self.queue.as_ref().is_some_and(|q| !q.is_empty()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_proto::MediaAction;

    #[test]
    fn player_page_always_first() {
        let pager = PagerState::compose(true, false, true);
        assert_eq!(pager.pages, [Page::Player, Page::CustomActions, Page::Queue]);
        assert_eq!(PagerState::default().pages, [Page::Player]);
    }

    #[test]
    fn desired_pager_ignores_empty_collections() {
        let mut state = MirrorState {
            actions: Some(ActionSet::default()),
            ..MirrorState::default()
        };
        assert!(!state.desired_pager().contains(Page::CustomActions));

        state.actions = Some(ActionSet {
            actions: vec![MediaAction {
                action_id: "like".into(),
                label: "Like".into(),
                icon: None,
            }],
        });
        assert!(state.desired_pager().contains(Page::CustomActions));
    }
}
