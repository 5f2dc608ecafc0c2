use std::{
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use super::*;
use crate::backend::{
    test::{SentEvent, TestTimer, TestWindowSystem},
    Atom, BackendError, ClientMessage, Property, PropertyNotify, PropertyState, SelectionNotify, SelectionRequest, WindowRole,
    WindowSystem, X11Window, NONE,
};
use crate::utils::{Local, Monotonic, Point, Rectangle, Root, Time};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Default)]
struct Recorder {
    answer: Option<DragResponse>,
    drop_answer: Option<DropResponse>,
    motions: Vec<(X11Window, Point<i32, Local>, DndActions, bool)>,
    drops: Vec<(X11Window, Point<i32, Local>, Vec<String>, DndActions)>,
    left: Vec<X11Window>,
    cursor: Vec<DndAction>,
    finished: Vec<(DragId, DropOutcome)>,
    received: Vec<(TransferId, String, Option<Vec<u8>>)>,
}

impl Recorder {
    fn accepting(action: DndAction) -> Recorder {
        Recorder {
            answer: Some(DragResponse::accept(action)),
            drop_answer: Some(DropResponse::accept(action)),
            ..Recorder::default()
        }
    }
}

impl XdndHandler for Recorder {
    fn drag_motion(&mut self, window: X11Window, motion: &DragMotion<'_>) -> DragResponse {
        self.motions
            .push((window, motion.point, motion.supported, motion.local));
        self.answer.unwrap_or_else(DragResponse::refuse)
    }

    fn drop_performed(&mut self, window: X11Window, motion: &DragMotion<'_>) -> DropResponse {
        self.drops.push((
            window,
            motion.point,
            motion.mime_types.to_vec(),
            motion.supported,
        ));
        self.drop_answer.unwrap_or_else(DropResponse::refuse)
    }

    fn drag_left(&mut self, window: X11Window) {
        self.left.push(window);
    }

    fn update_cursor(&mut self, action: DndAction) {
        self.cursor.push(action);
    }

    fn drop_finished(&mut self, drag: DragId, outcome: DropOutcome) {
        self.finished.push((drag, outcome));
    }

    fn data_received(&mut self, transfer: TransferId, mime_type: &str, data: Option<Vec<u8>>) {
        self.received.push((transfer, mime_type.to_owned(), data));
    }
}

/// Data source counting how often it is dropped
#[derive(Debug)]
struct CountedData {
    data: DragData,
    released: Arc<AtomicUsize>,
}

impl DataSource for CountedData {
    fn mime_types(&self) -> Vec<String> {
        self.data.mime_types()
    }

    fn data(&self, mime_type: &str) -> Option<Vec<u8>> {
        self.data.data(mime_type)
    }
}

impl Drop for CountedData {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct Fixture {
    xdnd: XdndState<TestWindowSystem>,
    timer: TestTimer,
    atoms: Atoms,
    root: X11Window,
}

impl Fixture {
    fn new() -> Fixture {
        Fixture::with_config(XdndConfig::default())
    }

    fn with_config(config: XdndConfig) -> Fixture {
        init_logging();
        let backend = TestWindowSystem::new();
        let root = backend.root();
        let timer = TestTimer::new();
        let xdnd = XdndState::new(backend, config, Box::new(timer.clone())).unwrap();
        let atoms = *xdnd.atoms();
        Fixture {
            xdnd,
            timer,
            atoms,
            root,
        }
    }

    fn window(&mut self, rect: (i32, i32, i32, i32)) -> X11Window {
        let root = self.root;
        self.xdnd
            .backend_mut()
            .create_test_window(root, Rectangle::from_loc_and_size((rect.0, rect.1), (rect.2, rect.3)))
    }

    fn local_window(&mut self, rect: (i32, i32, i32, i32)) -> X11Window {
        let window = self.window(rect);
        self.xdnd.enable_window(window, WindowKind::Normal).unwrap();
        window
    }

    fn remote_window(&mut self, rect: (i32, i32, i32, i32)) -> X11Window {
        let window = self.window(rect);
        let aware = Property::from_u32s(self.atoms.ATOM, &[5]);
        self.xdnd
            .backend_mut()
            .set_property(window, self.atoms.XdndAware, aware);
        window
    }

    fn atom(&mut self, name: &str) -> Atom {
        self.xdnd.backend_mut().atom(name)
    }

    fn start(&mut self, app: &mut Recorder, data: impl DataSource + 'static) -> DragId {
        self.xdnd
            .start_drag(
                app,
                NONE,
                Arc::new(data),
                DndActions::COPY | DndActions::MOVE,
                DndAction::None,
            )
            .unwrap()
    }

    fn motion(&mut self, app: &mut Recorder, point: (i32, i32)) {
        self.xdnd
            .pointer_motion(app, point.into(), Buttons::LEFT, Modifiers::empty());
    }

    fn drop_at(&mut self, app: &mut Recorder, point: (i32, i32)) {
        self.xdnd
            .drop_drag(app, point.into(), Buttons::empty(), Modifiers::empty());
    }

    /// A message some other client sends about `window`
    fn receive(&mut self, app: &mut Recorder, window: X11Window, msg: XdndMessage) -> bool {
        let message = msg.encode(window, &self.atoms);
        self.xdnd.handle_event(app, XdndEvent::ClientMessage(message))
    }

    fn status(
        &mut self,
        app: &mut Recorder,
        target: X11Window,
        accept: bool,
        action: DndAction,
        rect: Option<Rectangle<i32, Root>>,
    ) {
        let selection_window = self.xdnd.selection_window();
        let status = XdndMessage::Status {
            target,
            accept,
            rect,
            action,
        };
        assert!(self.receive(app, selection_window, status));
    }

    fn sent(&mut self) -> Vec<(X11Window, XdndMessage)> {
        let atoms = self.atoms;
        self.xdnd
            .backend_mut()
            .take_client_messages()
            .into_iter()
            .map(|(destination, message)| (destination, XdndMessage::decode(&message, &atoms).unwrap()))
            .collect()
    }

    fn selection_notifies(&mut self) -> Vec<(X11Window, SelectionNotify)> {
        self.xdnd
            .backend_mut()
            .take_sent()
            .into_iter()
            .filter_map(|event| match event {
                SentEvent::SelectionNotify { destination, notify } => Some((destination, notify)),
                SentEvent::ClientMessage { .. } => None,
            })
            .collect()
    }
}

fn hello() -> DragData {
    DragData::new().with("text/plain", b"hello".to_vec())
}

#[test]
fn accepted_local_drop() {
    let mut f = Fixture::new();
    let mut app = Recorder::accepting(DndAction::Copy);
    let window = f.local_window((100, 100, 400, 300));

    let id = f.start(&mut app, hello());
    assert_eq!(f.xdnd.backend().grab(), f.xdnd.backend().windows_with_role(WindowRole::DragIcon).first().copied());

    f.motion(&mut app, (150, 150));
    assert_eq!(
        app.motions,
        vec![(window, Point::from((50, 50)), DndActions::COPY | DndActions::MOVE, true)]
    );
    assert_eq!(app.cursor.last(), Some(&DndAction::Copy));
    assert_eq!(f.xdnd.offered_mime_types(), Some(&["text/plain".to_owned()][..]));

    f.drop_at(&mut app, (150, 150));
    assert_eq!(app.drops.len(), 1);
    assert_eq!(app.drops[0].0, window);
    assert_eq!(app.drops[0].2, vec!["text/plain".to_owned()]);
    assert_eq!(
        app.finished,
        vec![(
            id,
            DropOutcome::Finished {
                accepted: true,
                action: DndAction::Copy
            }
        )]
    );
    assert_eq!(f.xdnd.pending_drops(), 0);

    let transfer = f.xdnd.request_data(&mut app, "text/plain").unwrap();
    assert_eq!(
        app.received,
        vec![(transfer, "text/plain".to_owned(), Some(b"hello".to_vec()))]
    );

    assert_eq!(f.xdnd.end_drag(&mut app), DndAction::Copy);
    assert!(!f.xdnd.is_dragging());
    assert!(f.sent().is_empty());
    assert_eq!(f.xdnd.backend().grab(), None);
    assert!(f.xdnd.backend().windows_with_role(WindowRole::DragIcon).is_empty());
    assert!(!f.timer.is_armed(TimerKind::TransactionSweep));
}

#[test]
fn unfinished_remote_drop_expires() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    let remote = f.remote_window((100, 100, 400, 300));
    let released = Arc::new(AtomicUsize::new(0));

    let id = f.start(
        &mut app,
        CountedData {
            data: hello(),
            released: released.clone(),
        },
    );
    f.motion(&mut app, (150, 150));
    f.status(&mut app, remote, true, DndAction::Copy, None);
    f.drop_at(&mut app, (150, 150));

    let sent = f.sent();
    assert!(matches!(sent.last(), Some((dest, XdndMessage::Drop { .. })) if *dest == remote));
    assert_eq!(f.xdnd.pending_drops(), 1);
    assert!(f.timer.is_armed(TimerKind::TransactionSweep));

    assert_eq!(f.xdnd.end_drag(&mut app), DndAction::Copy);
    assert_eq!(released.load(Ordering::SeqCst), 0);

    let now = f.xdnd.clock.now();
    f.xdnd
        .handle_timeout_at(&mut app, TimerKind::TransactionSweep, now + Duration::from_millis(1000));
    assert_eq!(f.xdnd.pending_drops(), 1);

    f.xdnd
        .handle_timeout_at(&mut app, TimerKind::TransactionSweep, now + Duration::from_millis(6000));
    assert_eq!(f.xdnd.pending_drops(), 0);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(app.finished, vec![(id, DropOutcome::Expired)]);
    assert!(!f.timer.is_armed(TimerKind::TransactionSweep));

    // a late answer finds nothing to finish
    let selection_window = f.xdnd.selection_window();
    let finished = XdndMessage::Finished {
        target: remote,
        accept: true,
        action: DndAction::Copy,
    };
    assert!(f.receive(&mut app, selection_window, finished));
    assert_eq!(app.finished.len(), 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn sweep_with_an_earlier_clock_keeps_drops() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    let remote = f.remote_window((100, 100, 400, 300));

    f.start(&mut app, hello());
    f.motion(&mut app, (150, 150));
    f.status(&mut app, remote, true, DndAction::Copy, None);
    f.drop_at(&mut app, (150, 150));
    assert_eq!(f.xdnd.pending_drops(), 1);

    let earlier = Time::<Monotonic>::from(Duration::from_millis(1));
    f.xdnd
        .handle_timeout_at(&mut app, TimerKind::TransactionSweep, earlier);
    assert_eq!(f.xdnd.pending_drops(), 1);
    assert!(app.finished.is_empty());
    assert!(f.timer.is_armed(TimerKind::TransactionSweep));

    let now = f.xdnd.clock.now();
    f.xdnd
        .handle_timeout_at(&mut app, TimerKind::TransactionSweep, now + Duration::from_millis(6000));
    assert_eq!(f.xdnd.pending_drops(), 0);
}

#[test]
fn motion_after_drop_stays_with_dropped_target() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    let first = f.remote_window((100, 100, 200, 300));
    let second = f.remote_window((300, 100, 200, 300));

    f.start(&mut app, hello());
    f.motion(&mut app, (150, 150));
    f.status(&mut app, first, true, DndAction::Copy, None);
    f.drop_at(&mut app, (150, 150));
    f.sent();

    let icons = f.xdnd.backend().windows_with_role(WindowRole::DragIcon);
    f.motion(&mut app, (350, 150));
    assert!(f.sent().is_empty());
    assert_eq!(f.xdnd.backend().windows_with_role(WindowRole::DragIcon), icons);
    assert_eq!(f.xdnd.pending_drops(), 1);

    let selection_window = f.xdnd.selection_window();
    let finished = XdndMessage::Finished {
        target: first,
        accept: true,
        action: DndAction::Copy,
    };
    assert!(f.receive(&mut app, selection_window, finished));
    assert_eq!(f.xdnd.pending_drops(), 0);

    assert_eq!(f.xdnd.end_drag(&mut app), DndAction::Copy);
    assert!(f.sent().is_empty());
}

#[test]
fn unfinished_local_drop_is_refused() {
    let mut f = Fixture::new();
    let mut app = Recorder::accepting(DndAction::Copy);
    let window = f.local_window((100, 100, 400, 300));
    let text = f.atom("text/plain");

    let id = f.start(&mut app, hello());
    f.motion(&mut app, (150, 150));

    // another client takes over the window before the drop
    let enter = XdndMessage::Enter {
        source: 0x4242,
        version: 5,
        has_type_list: false,
        types: [text, NONE, NONE],
    };
    assert!(f.receive(&mut app, window, enter));

    f.drop_at(&mut app, (150, 150));
    assert!(app.drops.is_empty());
    assert_eq!(
        app.finished,
        vec![(
            id,
            DropOutcome::Finished {
                accepted: false,
                action: DndAction::None
            }
        )]
    );
    assert_eq!(f.xdnd.pending_drops(), 0);
    assert_eq!(f.xdnd.end_drag(&mut app), DndAction::None);
}

#[test]
fn failed_grab_releases_icon_and_selection() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    f.xdnd.backend_mut().set_grab_failure(true);

    let result = f.xdnd.start_drag(
        &mut app,
        NONE,
        Arc::new(hello()),
        DndActions::COPY,
        DndAction::None,
    );
    assert!(matches!(
        result,
        Err(XdndError::Backend(BackendError::ConnectionLost))
    ));
    assert!(!f.xdnd.is_dragging());
    assert!(f.xdnd.backend().windows_with_role(WindowRole::DragIcon).is_empty());
    let selection = f.atoms.XdndSelection;
    assert_eq!(f.xdnd.backend_mut().selection_owner(selection).unwrap(), NONE);

    f.xdnd.backend_mut().set_grab_failure(false);
    f.start(&mut app, hello());
    assert!(f.xdnd.is_dragging());
}

#[test]
fn remote_finish_completes_transaction() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    let remote = f.remote_window((100, 100, 400, 300));

    let id = f.start(&mut app, hello());
    f.motion(&mut app, (150, 150));
    f.status(&mut app, remote, true, DndAction::Move, None);
    f.drop_at(&mut app, (150, 150));

    // stale finish of some other window
    let selection_window = f.xdnd.selection_window();
    let other = XdndMessage::Finished {
        target: 0x4242,
        accept: true,
        action: DndAction::Copy,
    };
    f.receive(&mut app, selection_window, other);
    assert_eq!(f.xdnd.pending_drops(), 1);
    assert!(app.finished.is_empty());

    let finished = XdndMessage::Finished {
        target: remote,
        accept: true,
        action: DndAction::Move,
    };
    f.receive(&mut app, selection_window, finished);
    assert_eq!(f.xdnd.pending_drops(), 0);
    assert!(!f.timer.is_armed(TimerKind::TransactionSweep));
    assert_eq!(
        app.finished,
        vec![(
            id,
            DropOutcome::Finished {
                accepted: true,
                action: DndAction::Move
            }
        )]
    );
    assert_eq!(f.xdnd.end_drag(&mut app), DndAction::Move);
}

#[test]
fn position_from_stale_source_is_ignored() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    let window = f.local_window((100, 100, 400, 300));
    let source = f.window((0, 0, 10, 10));
    let other = f.window((20, 0, 10, 10));
    let text = f.atom("text/plain");

    let enter = XdndMessage::Enter {
        source,
        version: 5,
        has_type_list: false,
        types: [text, NONE, NONE],
    };
    assert!(f.receive(&mut app, window, enter));
    assert_eq!(f.xdnd.offered_mime_types(), Some(&["text/plain".to_owned()][..]));

    let stale = XdndMessage::Position {
        source: other,
        point: (150, 150).into(),
        time: 10,
        action: DndAction::Copy,
    };
    assert!(f.receive(&mut app, window, stale));
    assert!(f.sent().is_empty());
    assert!(app.motions.is_empty());
    assert_eq!(f.xdnd.offered_mime_types(), Some(&["text/plain".to_owned()][..]));

    let position = XdndMessage::Position {
        source,
        point: (150, 150).into(),
        time: 11,
        action: DndAction::Copy,
    };
    f.receive(&mut app, window, position);
    assert_eq!(
        f.sent(),
        vec![(
            source,
            XdndMessage::Status {
                target: window,
                accept: false,
                rect: None,
                action: DndAction::None,
            }
        )]
    );
    assert_eq!(app.motions.len(), 1);
    assert!(!app.motions[0].3);
}

#[test]
fn newer_protocol_versions_are_refused() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    let window = f.local_window((100, 100, 400, 300));
    let source = f.window((0, 0, 10, 10));

    let enter = XdndMessage::Enter {
        source,
        version: 6,
        has_type_list: false,
        types: [NONE; 3],
    };
    f.receive(&mut app, window, enter);
    assert_eq!(f.xdnd.offered_mime_types(), None);

    let position = XdndMessage::Position {
        source,
        point: (150, 150).into(),
        time: 11,
        action: DndAction::Copy,
    };
    f.receive(&mut app, window, position);
    assert!(f.sent().is_empty());
}

#[test]
fn large_type_lists_go_through_property() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    let remote = f.remote_window((100, 100, 400, 300));
    let data = hello()
        .with("text/html", b"<b>hello</b>".to_vec())
        .with("image/png", Vec::new());

    f.start(&mut app, data);
    f.motion(&mut app, (150, 150));

    let text = f.atom("text/plain");
    let html = f.atom("text/html");
    let png = f.atom("image/png");
    let atoms = f.atoms;
    let sent = f.sent();
    assert_eq!(
        sent[0],
        (
            remote,
            XdndMessage::Enter {
                source: f.xdnd.selection_window(),
                version: 5,
                has_type_list: true,
                types: [text, atoms.UTF8_STRING, atoms.STRING],
            }
        )
    );
    let list = f
        .xdnd
        .backend()
        .property(f.xdnd.selection_window(), atoms.XdndTypeList)
        .and_then(|list| list.value32().map(|types| types.collect::<Vec<_>>()));
    assert_eq!(
        list,
        Some(vec![text, atoms.UTF8_STRING, atoms.STRING, atoms.TEXT, html, png])
    );
}

#[test]
fn type_list_read_is_bounded() {
    let mut f = Fixture::with_config(XdndConfig {
        max_type_list: 3,
        ..XdndConfig::default()
    });
    let mut app = Recorder::default();
    let window = f.local_window((100, 100, 400, 300));
    let source = f.window((0, 0, 10, 10));
    let types = (1..=5).map(|i| f.atom(&format!("application/x-{i}"))).collect::<Vec<_>>();
    let list = Property::from_u32s(f.atoms.ATOM, &types);
    let type_list = f.atoms.XdndTypeList;
    f.xdnd.backend_mut().set_property(source, type_list, list);

    let enter = XdndMessage::Enter {
        source,
        version: 5,
        has_type_list: true,
        types: [types[0], types[1], types[2]],
    };
    f.receive(&mut app, window, enter);
    assert_eq!(
        f.xdnd.offered_mime_types().map(<[String]>::to_vec),
        Some(vec![
            "application/x-1".to_owned(),
            "application/x-2".to_owned(),
            "application/x-3".to_owned(),
        ])
    );
}

#[test]
fn one_position_per_status() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    let remote = f.remote_window((100, 100, 400, 300));

    f.start(&mut app, hello());
    f.motion(&mut app, (150, 150));
    f.motion(&mut app, (300, 250));
    f.motion(&mut app, (310, 250));

    let positions = |sent: &[(X11Window, XdndMessage)]| {
        sent.iter()
            .filter(|(_, msg)| matches!(msg, XdndMessage::Position { .. }))
            .count()
    };
    assert_eq!(positions(&f.sent()), 1);

    f.status(&mut app, remote, false, DndAction::None, None);
    f.motion(&mut app, (320, 250));
    let sent = f.sent();
    assert_eq!(positions(&sent), 1);
    assert!(matches!(
        sent[0].1,
        XdndMessage::Position { point, .. } if point == Point::from((320, 250))
    ));
}

#[test]
fn same_answer_rect_debounces_motion() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    let remote = f.remote_window((100, 100, 400, 300));

    f.start(&mut app, hello());
    f.motion(&mut app, (150, 150));
    f.sent();

    // the provisional area around the entering position
    f.status(
        &mut app,
        remote,
        true,
        DndAction::Copy,
        Some(Rectangle::from_loc_and_size((100, 100), (100, 100))),
    );
    f.motion(&mut app, (160, 170));
    f.motion(&mut app, (199, 199));
    assert!(f.sent().is_empty());

    f.motion(&mut app, (200, 150));
    assert_eq!(f.sent().len(), 1);
}

#[test]
fn switching_targets_leaves_before_entering() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    let first = f.remote_window((100, 100, 200, 200));
    let second = f.remote_window((400, 100, 200, 200));

    f.start(&mut app, hello());
    f.motion(&mut app, (150, 150));
    f.status(&mut app, first, true, DndAction::Copy, None);
    f.sent();

    f.motion(&mut app, (450, 150));
    let sent = f.sent();
    let selection_window = f.xdnd.selection_window();
    assert_eq!(sent.len(), 3);
    assert_eq!(
        sent[0],
        (
            first,
            XdndMessage::Leave {
                source: selection_window
            }
        )
    );
    assert!(matches!(sent[1], (dest, XdndMessage::Enter { .. }) if dest == second));
    assert!(matches!(sent[2], (dest, XdndMessage::Position { .. }) if dest == second));
    assert_eq!(app.cursor.last(), Some(&DndAction::None));
}

#[test]
fn leaving_all_targets_ends_without_action() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    let remote = f.remote_window((100, 100, 200, 200));

    f.start(&mut app, hello());
    f.motion(&mut app, (150, 150));
    f.status(&mut app, remote, true, DndAction::Copy, None);
    f.motion(&mut app, (1000, 1000));
    f.drop_at(&mut app, (1000, 1000));

    assert_eq!(f.xdnd.pending_drops(), 0);
    assert_eq!(f.xdnd.end_drag(&mut app), DndAction::None);
}

#[test]
fn ending_over_accepting_target_reports_accepted_action() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    let remote = f.remote_window((100, 100, 200, 200));

    f.start(&mut app, hello());
    f.motion(&mut app, (150, 150));
    f.status(&mut app, remote, true, DndAction::Move, None);
    f.sent();

    assert_eq!(f.xdnd.end_drag(&mut app), DndAction::Move);
    let selection_window = f.xdnd.selection_window();
    assert_eq!(
        f.sent(),
        vec![(
            remote,
            XdndMessage::Leave {
                source: selection_window
            }
        )]
    );
}

#[test]
fn cancel_leaves_target_and_releases_grab() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    let remote = f.remote_window((100, 100, 200, 200));

    f.start(&mut app, hello());
    f.motion(&mut app, (150, 150));
    f.status(&mut app, remote, true, DndAction::Copy, None);
    f.sent();

    f.xdnd.cancel_drag(&mut app);
    assert!(matches!(f.sent()[..], [(dest, XdndMessage::Leave { .. })] if dest == remote));
    assert!(!f.xdnd.is_dragging());
    assert_eq!(f.xdnd.backend().grab(), None);
    assert_eq!(f.xdnd.end_drag(&mut app), DndAction::None);
}

#[test]
fn stale_status_is_ignored() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    let remote = f.remote_window((100, 100, 200, 200));

    f.start(&mut app, hello());
    f.motion(&mut app, (150, 150));
    f.status(&mut app, 0x4242, true, DndAction::Copy, None);
    assert_eq!(app.cursor.last(), Some(&DndAction::None));

    f.status(&mut app, remote, true, DndAction::Copy, None);
    assert_eq!(app.cursor.last(), Some(&DndAction::Copy));
}

#[test]
fn second_drag_is_refused() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();

    f.start(&mut app, hello());
    let second = f.xdnd.start_drag(
        &mut app,
        NONE,
        Arc::new(hello()),
        DndActions::COPY,
        DndAction::None,
    );
    assert!(matches!(second, Err(XdndError::DragInProgress)));
}

#[test]
fn foreign_grab_is_not_stolen() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    f.xdnd.backend_mut().set_foreign_grab(true);

    f.start(&mut app, hello());
    assert_eq!(f.xdnd.backend().grab(), None);

    f.xdnd.end_drag(&mut app);
    assert_eq!(f.xdnd.backend().grab(), None);
}

#[test]
fn drag_icon_follows_desktops() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    f.xdnd
        .backend_mut()
        .add_desktop(Rectangle::from_loc_and_size((1920, 0), (1920, 1080)));

    f.start(&mut app, hello());
    let icons = f.xdnd.backend().windows_with_role(WindowRole::DragIcon);
    assert_eq!(icons.len(), 1);

    f.motion(&mut app, (2000, 100));
    let moved = f.xdnd.backend().windows_with_role(WindowRole::DragIcon);
    assert_eq!(moved.len(), 1);
    assert_ne!(moved, icons);
    assert_eq!(f.xdnd.backend().grab(), Some(moved[0]));
}

#[test]
fn always_rejecting_windows_never_accept() {
    let rejected = Arc::new(AtomicU32::new(NONE));
    let predicate = rejected.clone();
    let mut f = Fixture::with_config(XdndConfig {
        always_rejecting: Some(Arc::new(move |window: X11Window| {
            window == predicate.load(Ordering::SeqCst)
        })),
        ..XdndConfig::default()
    });
    let mut app = Recorder::default();
    let collection = f.remote_window((100, 100, 200, 200));
    rejected.store(collection, Ordering::SeqCst);

    f.start(&mut app, hello());
    f.motion(&mut app, (150, 150));
    let sent = f.sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(sent[0].1, XdndMessage::Enter { .. }));

    f.status(&mut app, collection, true, DndAction::Copy, None);
    assert_eq!(app.cursor.last(), Some(&DndAction::None));
    assert_eq!(f.xdnd.end_drag(&mut app), DndAction::None);
}

#[test]
fn desktop_windows_get_a_proxy_and_refuse_drops() {
    let mut f = Fixture::new();
    let mut app = Recorder::accepting(DndAction::Copy);
    let desktop = f.window((0, 0, 1920, 1080));
    f.xdnd.enable_window(desktop, WindowKind::Desktop).unwrap();

    let proxy = f.xdnd.backend().windows_with_role(WindowRole::DesktopProxy)[0];
    let atoms = f.atoms;
    let backend = f.xdnd.backend();
    assert_eq!(
        backend.property(desktop, atoms.XdndProxy).and_then(Property::first_u32),
        Some(proxy)
    );
    assert_eq!(
        backend.property(proxy, atoms.XdndProxy).and_then(Property::first_u32),
        Some(proxy)
    );
    assert!(backend.property(proxy, atoms.XdndAware).is_some());
    assert!(backend.property(desktop, atoms.XdndAware).is_none());

    f.start(&mut app, hello());
    f.motion(&mut app, (150, 150));
    let sent = f.sent();
    assert!(sent.iter().all(|(dest, _)| *dest == proxy));
    assert!(matches!(sent[0].1, XdndMessage::Enter { .. }));
    assert!(matches!(sent[1].1, XdndMessage::Position { .. }));

    // the proxy delivers the messages back to us
    for (_, msg) in sent {
        f.receive(&mut app, desktop, msg);
    }
    assert!(app.motions.is_empty());
    assert_eq!(app.cursor.last(), Some(&DndAction::None));

    f.xdnd.end_drag(&mut app);
    f.xdnd.disable_window(desktop);
    assert!(!f.xdnd.backend().exists(proxy));
    assert!(f.xdnd.backend().property(desktop, atoms.XdndProxy).is_none());
}

#[test]
fn disabled_windows_are_no_longer_aware() {
    let mut f = Fixture::new();
    let window = f.local_window((100, 100, 400, 300));
    let aware = f.atoms.XdndAware;
    assert_eq!(
        f.xdnd.backend().property(window, aware).and_then(Property::first_u32),
        Some(5)
    );

    f.xdnd.disable_window(window);
    assert!(f.xdnd.backend().property(window, aware).is_none());
}

fn drop_on_remote(f: &mut Fixture, app: &mut Recorder, data: DragData) -> X11Window {
    let remote = f.remote_window((100, 100, 400, 300));
    f.start(app, data);
    f.motion(app, (150, 150));
    f.status(app, remote, true, DndAction::Copy, None);
    f.drop_at(app, (150, 150));
    f.xdnd.backend_mut().take_sent();
    remote
}

fn selection_request(f: &mut Fixture, requestor: X11Window, target: Atom, property: Atom, time: u32) -> bool {
    let request = SelectionRequest {
        time,
        owner: f.xdnd.selection_window(),
        requestor,
        selection: f.atoms.XdndSelection,
        target,
        property,
    };
    let mut app = Recorder::default();
    f.xdnd.handle_event(&mut app, XdndEvent::SelectionRequest(request))
}

#[test]
fn targets_list_offered_types() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    let remote = drop_on_remote(&mut f, &mut app, hello());
    let property = f.atom("XDND_DATA");
    let time = f.xdnd.backend().timestamp();

    let targets = f.atoms.TARGETS;
    assert!(selection_request(&mut f, remote, targets, property, time));
    let text = f.atom("text/plain");
    let atoms = f.atoms;
    let value = f
        .xdnd
        .backend()
        .property(remote, property)
        .and_then(|value| value.value32().map(|atoms| atoms.collect::<Vec<_>>()));
    assert_eq!(
        value,
        Some(vec![
            atoms.TARGETS,
            text,
            atoms.UTF8_STRING,
            atoms.STRING,
            atoms.TEXT
        ])
    );
    assert_eq!(f.selection_notifies()[0].1.property, property);
}

#[test]
fn large_data_is_sent_incrementally() {
    let mut f = Fixture::with_config(XdndConfig {
        incr_chunk_size: 40,
        ..XdndConfig::default()
    });
    let mut app = Recorder::default();
    let data = (0..100u8).collect::<Vec<_>>();
    let remote = drop_on_remote(&mut f, &mut app, DragData::new().with("text/plain", data.clone()));
    let property = f.atom("XDND_DATA");
    let text = f.atom("text/plain");
    let time = f.xdnd.backend().timestamp();

    assert!(selection_request(&mut f, remote, text, property, time));
    let marker = f.xdnd.backend().property(remote, property).cloned().unwrap();
    assert_eq!(marker.type_, f.atoms.INCR);
    assert!(f.xdnd.backend().is_watched(remote));
    assert_eq!(
        f.selection_notifies(),
        vec![(
            remote,
            SelectionNotify {
                time,
                requestor: remote,
                selection: f.atoms.XdndSelection,
                target: text,
                property,
            }
        )]
    );
    assert!(f.timer.is_armed(TimerKind::TransferDeadline));

    let mut chunks = Vec::new();
    for _ in 0..4 {
        f.xdnd.backend_mut().delete_property(remote, property).unwrap();
        let deleted = PropertyNotify {
            window: remote,
            atom: property,
            time,
            state: PropertyState::Deleted,
        };
        assert!(f.xdnd.handle_event(&mut app, XdndEvent::PropertyNotify(deleted)));
        let chunk = f.xdnd.backend().property(remote, property).cloned().unwrap();
        assert_eq!(chunk.type_, text);
        chunks.push(chunk.value);
    }
    assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![40, 40, 20, 0]);
    assert_eq!(chunks.concat(), data);

    f.xdnd.backend_mut().delete_property(remote, property).unwrap();
    let deleted = PropertyNotify {
        window: remote,
        atom: property,
        time,
        state: PropertyState::Deleted,
    };
    assert!(f.xdnd.handle_event(&mut app, XdndEvent::PropertyNotify(deleted)));
    assert!(!f.timer.is_armed(TimerKind::TransferDeadline));
    assert!(!f.xdnd.handle_event(&mut app, XdndEvent::PropertyNotify(deleted)));
}

#[test]
fn requests_without_matching_drag_fail() {
    let mut f = Fixture::new();
    let stranger = f.window((0, 0, 10, 10));
    let property = f.atom("XDND_DATA");
    let text = f.atom("text/plain");

    assert!(selection_request(&mut f, stranger, text, property, 4242));
    let notifies = f.selection_notifies();
    assert_eq!(notifies.len(), 1);
    assert_eq!(notifies[0].1.property, NONE);
    assert!(f.xdnd.backend().property(stranger, property).is_none());
}

struct RemoteSource {
    source: X11Window,
    window: X11Window,
}

fn remote_drop(f: &mut Fixture, app: &mut Recorder, time: u32) -> RemoteSource {
    let window = f.local_window((100, 100, 400, 300));
    let source = f.window((0, 0, 10, 10));
    let text = f.atom("text/plain");
    let selection = f.atoms.XdndSelection;
    f.xdnd
        .backend_mut()
        .set_selection_owner(source, selection, time)
        .unwrap();

    let enter = XdndMessage::Enter {
        source,
        version: 5,
        has_type_list: false,
        types: [text, NONE, NONE],
    };
    f.receive(app, window, enter);
    let position = XdndMessage::Position {
        source,
        point: (150, 150).into(),
        time,
        action: DndAction::Copy,
    };
    f.receive(app, window, position);
    let drop = XdndMessage::Drop {
        source,
        time,
        actions: DndActions::empty(),
    };
    f.receive(app, window, drop);
    RemoteSource { source, window }
}

#[test]
fn remote_drop_is_finished() {
    let mut f = Fixture::new();
    let mut app = Recorder::accepting(DndAction::Copy);
    let RemoteSource { source, window } = remote_drop(&mut f, &mut app, 2000);

    assert_eq!(app.drops.len(), 1);
    assert_eq!(app.drops[0].1, Point::from((50, 50)));
    assert_eq!(app.drops[0].3, DndActions::COPY);
    let sent = f.sent();
    assert_eq!(
        sent.last(),
        Some(&(
            source,
            XdndMessage::Finished {
                target: window,
                accept: true,
                action: DndAction::Copy,
            }
        ))
    );

    // a leave after the drop does not cancel it
    let leave = XdndMessage::Leave { source };
    f.receive(&mut app, window, leave);
    assert!(app.left.is_empty());
}

#[test]
fn leave_from_source_notifies_application() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    let window = f.local_window((100, 100, 400, 300));
    let source = f.window((0, 0, 10, 10));

    let enter = XdndMessage::Enter {
        source,
        version: 5,
        has_type_list: false,
        types: [NONE; 3],
    };
    f.receive(&mut app, window, enter);
    f.receive(&mut app, window, XdndMessage::Leave { source: 0x4242 });
    assert!(app.left.is_empty());

    f.receive(&mut app, window, XdndMessage::Leave { source });
    assert_eq!(app.left, vec![window]);
    assert_eq!(f.xdnd.offered_mime_types(), None);
}

#[test]
fn dropped_data_is_fetched_from_remote_source() {
    let mut f = Fixture::new();
    let mut app = Recorder::accepting(DndAction::Copy);
    remote_drop(&mut f, &mut app, 2000);
    let selection_window = f.xdnd.selection_window();
    let text = f.atom("text/plain");
    let atoms = f.atoms;

    let id = f.xdnd.request_data(&mut app, "text/plain").unwrap();
    let conversions = f.xdnd.backend_mut().take_conversions();
    assert_eq!(conversions.len(), 1);
    let conversion = conversions[0];
    assert_eq!(conversion.requestor, selection_window);
    assert_eq!(conversion.selection, atoms.XdndSelection);
    assert_eq!(conversion.target, text);
    assert_eq!(conversion.time, 2000);
    assert!(f.timer.is_armed(TimerKind::TransferDeadline));

    let property = conversion.property;
    f.xdnd
        .backend_mut()
        .set_property(selection_window, property, Property::from_bytes(text, b"hi".to_vec()));
    let notify = SelectionNotify {
        time: 2000,
        requestor: selection_window,
        selection: atoms.XdndSelection,
        target: text,
        property,
    };
    assert!(f.xdnd.handle_event(&mut app, XdndEvent::SelectionNotify(notify)));
    assert_eq!(app.received, vec![(id, "text/plain".to_owned(), Some(b"hi".to_vec()))]);
    assert!(f.xdnd.backend().property(selection_window, property).is_none());
    assert!(!f.timer.is_armed(TimerKind::TransferDeadline));
}

#[test]
fn incremental_data_is_collected() {
    let mut f = Fixture::new();
    let mut app = Recorder::accepting(DndAction::Copy);
    remote_drop(&mut f, &mut app, 2000);
    let selection_window = f.xdnd.selection_window();
    let text = f.atom("text/plain");
    let atoms = f.atoms;

    let id = f.xdnd.request_data(&mut app, "text/plain").unwrap();
    let property = f.xdnd.backend_mut().take_conversions()[0].property;
    let backend = f.xdnd.backend_mut();
    backend.set_property(selection_window, property, Property::from_u32s(atoms.INCR, &[5]));
    let notify = SelectionNotify {
        time: 2000,
        requestor: selection_window,
        selection: atoms.XdndSelection,
        target: text,
        property,
    };
    f.xdnd.handle_event(&mut app, XdndEvent::SelectionNotify(notify));
    assert!(f.xdnd.backend().property(selection_window, property).is_none());
    assert!(app.received.is_empty());

    for chunk in [&b"hel"[..], &b"lo"[..], &b""[..]] {
        f.xdnd
            .backend_mut()
            .set_property(selection_window, property, Property::from_bytes(text, chunk.to_vec()));
        let new_value = PropertyNotify {
            window: selection_window,
            atom: property,
            time: 2000,
            state: PropertyState::NewValue,
        };
        assert!(f.xdnd.handle_event(&mut app, XdndEvent::PropertyNotify(new_value)));
    }
    assert_eq!(
        app.received,
        vec![(id, "text/plain".to_owned(), Some(b"hello".to_vec()))]
    );
}

#[test]
fn unanswered_fetch_times_out() {
    let mut f = Fixture::new();
    let mut app = Recorder::accepting(DndAction::Copy);
    remote_drop(&mut f, &mut app, 2000);

    let id = f.xdnd.request_data(&mut app, "text/plain").unwrap();
    let now = f.xdnd.clock.now();
    f.xdnd
        .handle_timeout_at(&mut app, TimerKind::TransferDeadline, now + Duration::from_millis(1000));
    assert!(app.received.is_empty());

    f.xdnd
        .handle_timeout_at(&mut app, TimerKind::TransferDeadline, now + Duration::from_millis(6000));
    assert_eq!(app.received, vec![(id, "text/plain".to_owned(), None)]);
    assert!(!f.timer.is_armed(TimerKind::TransferDeadline));
}

#[test]
fn formats_not_offered_have_no_data() {
    let mut f = Fixture::new();
    let mut app = Recorder::accepting(DndAction::Copy);
    assert_eq!(f.xdnd.request_data(&mut app, "text/plain"), None);

    remote_drop(&mut f, &mut app, 2000);
    let id = f.xdnd.request_data(&mut app, "image/png").unwrap();
    assert_eq!(app.received, vec![(id, "image/png".to_owned(), None)]);
    assert!(f.xdnd.backend_mut().take_conversions().is_empty());
}

#[test]
fn foreign_events_are_not_consumed() {
    let mut f = Fixture::new();
    let mut app = Recorder::default();
    let window = f.window((0, 0, 10, 10));
    let other = f.atom("_NET_WM_PING");

    let message = ClientMessage {
        window,
        type_: other,
        data: [0; 5],
    };
    assert!(!f.xdnd.handle_event(&mut app, XdndEvent::ClientMessage(message)));
    let notify = PropertyNotify {
        window,
        atom: other,
        time: 0,
        state: PropertyState::NewValue,
    };
    assert!(!f.xdnd.handle_event(&mut app, XdndEvent::PropertyNotify(notify)));
}
