use proptest::prelude::*;
use trellis_lib::models::{NewBoard, NewCard, NewList};
use trellis_lib::position::MAX_POSITION;
use trellis_lib::{Error, ScopeRef, Store};

struct Board {
    store: Store,
    user: String,
    board: String,
}

fn board() -> Board {
    let mut store = Store::open_in_memory().expect("store");
    let user = store.create_user("ann", "ann@example.com").expect("user").id;
    let board = store
        .create_board(&user, NewBoard { name: "Ordering".into(), ..Default::default() })
        .expect("board")
        .id;
    Board { store, user, board }
}

impl Board {
    fn list(&mut self, name: &str) -> String {
        self.store
            .create_list(
                &self.user,
                NewList { board_id: self.board.clone(), name: name.into(), position: 0 },
            )
            .expect("list")
            .id
    }

    fn card(&mut self, list: &str, title: &str) -> String {
        self.store
            .create_card(
                &self.user,
                NewCard { list_id: list.into(), title: title.into(), ..Default::default() },
            )
            .expect("card")
            .id
    }

    fn list_names(&self) -> Vec<String> {
        self.store
            .list_lists(&self.user, &self.board, false)
            .expect("lists")
            .into_iter()
            .map(|list| format!("{}{}", list.name, list.position))
            .collect()
    }

    fn active_cards(&self, list: &str) -> Vec<(String, i64)> {
        self.store
            .list_cards(&self.user, list, false)
            .expect("cards")
            .into_iter()
            .map(|card| (card.id, card.position))
            .collect()
    }
}

#[test]
fn append_to_empty_list_gets_position_one() {
    let mut b = board();
    let list = b.list("Todo");
    let card = b.card(&list, "first");
    assert_eq!(b.active_cards(&list), vec![(card, 1)]);
}

fn four_lists() -> (Board, Vec<String>) {
    let mut b = board();
    let ids = ["A", "B", "C", "D"].iter().map(|name| b.list(name)).collect();
    (b, ids)
}

#[test]
fn moving_right_shifts_the_window_down() {
    let (mut b, ids) = four_lists();
    let user = b.user.clone();
    b.store.move_list(&user, &ids[0], 3).expect("A to 3");
    assert_eq!(b.list_names(), vec!["B1", "C2", "A3", "D4"]);
}

#[test]
fn moving_left_shifts_the_window_up() {
    let (mut b, ids) = four_lists();
    let user = b.user.clone();
    b.store.move_list(&user, &ids[3], 2).expect("D to 2");
    assert_eq!(b.list_names(), vec!["A1", "D2", "B3", "C4"]);
}

#[test]
fn moving_to_the_current_position_is_idempotent() {
    let mut b = board();
    let list = b.list("Todo");
    let ids: Vec<String> = (0..3).map(|i| b.card(&list, &format!("c{i}"))).collect();
    let before = b.active_cards(&list);
    let user = b.user.clone();
    let card = b.store.move_card(&user, &ids[1], &list, 2).expect("noop");
    assert_eq!(card.position, 2);
    assert_eq!(b.active_cards(&list), before);
}

#[test]
fn archive_and_restore_keep_the_archived_position() {
    let mut b = board();
    let list = b.list("Todo");
    let ids: Vec<String> = (0..3).map(|i| b.card(&list, &format!("c{i}"))).collect();
    let user = b.user.clone();

    let archived = b.store.archive_card(&user, &ids[1]).expect("archive");
    assert_eq!(archived.position, 2);
    assert_eq!(
        b.active_cards(&list),
        vec![(ids[0].clone(), 1), (ids[2].clone(), 2)]
    );

    let restored = b.store.restore_card(&user, &ids[1]).expect("restore");
    assert_eq!(restored.position, 2);
    assert!(!restored.is_archived);
    assert!(restored.archived_at.is_none());
}

#[test]
fn negative_positions_are_rejected_everywhere() {
    let mut b = board();
    let list = b.list("Todo");
    let card = b.card(&list, "c");
    let user = b.user.clone();
    assert!(matches!(b.store.move_card(&user, &card, &list, -3), Err(Error::Validation(_))));
    assert!(matches!(
        b.store.create_list(
            &user,
            NewList { board_id: b.board.clone(), name: "X".into(), position: -1 }
        ),
        Err(Error::Validation(_))
    ));
}

#[test]
fn zero_moves_to_the_last_slot_not_position_zero() {
    let (mut b, ids) = four_lists();
    let user = b.user.clone();
    b.store.move_list(&user, &ids[1], 0).expect("B to the end");
    assert_eq!(b.list_names(), vec!["A1", "C2", "D3", "B4"]);

    let todo = ids[0].clone();
    let cards: Vec<String> = (0..3).map(|i| b.card(&todo, &format!("c{i}"))).collect();
    b.store.move_card(&user, &cards[0], &todo, 0).expect("c0 to the end");
    assert_eq!(
        b.active_cards(&todo),
        vec![(cards[1].clone(), 1), (cards[2].clone(), 2), (cards[0].clone(), 3)]
    );
}

#[test]
fn huge_positions_are_rejected_and_the_cap_still_shifts() {
    let mut b = board();
    let a = b.list("A");
    b.list("B");
    let user = b.user.clone();
    assert!(matches!(b.store.move_list(&user, &a, i64::MAX), Err(Error::Validation(_))));

    b.store.move_list(&user, &a, MAX_POSITION).expect("A to the cap");
    b.store
        .create_list(&user, NewList { board_id: b.board.clone(), name: "C".into(), position: 1 })
        .expect("insert ahead of a capped list");
    assert_eq!(
        b.list_names(),
        vec!["C1".to_string(), "B2".to_string(), format!("A{}", MAX_POSITION + 1)]
    );
}

#[test]
fn cross_list_moves_leave_drift_that_renumber_repairs() {
    let mut b = board();
    let todo = b.list("Todo");
    let done = b.list("Done");
    let ids: Vec<String> = (0..4).map(|i| b.card(&todo, &format!("c{i}"))).collect();
    let user = b.user.clone();

    b.store.move_card(&user, &ids[1], &done, 1).expect("move");
    let report = b
        .store
        .check_order(&user, &ScopeRef::List(todo.clone()))
        .expect("report");
    assert_eq!(report.positions, vec![1, 3, 4]);
    assert!(!report.contiguous);

    assert_eq!(b.store.renumber_cards(&user, &todo).expect("renumber"), 2);
    assert_eq!(
        b.active_cards(&todo).into_iter().map(|(_, p)| p).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
}

#[derive(Debug, Clone)]
enum Op {
    Add,
    Move(usize, i64),
    Archive(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Add),
        (0usize..16, 1i64..6).prop_map(|(item, to)| Op::Move(item, to)),
        (0usize..16).prop_map(Op::Archive),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn stored_positions_stay_contiguous(ops in prop::collection::vec(op(), 1..24)) {
        let mut b = board();
        let list = b.list("Todo");
        let user = b.user.clone();
        let mut counter = 0;
        for op in ops {
            let active = b.active_cards(&list);
            match op {
                Op::Add => {
                    b.card(&list, &format!("c{counter}"));
                    counter += 1;
                }
                Op::Move(item, to) if !active.is_empty() => {
                    let (id, _) = &active[item % active.len()];
                    let to = (to - 1) % active.len() as i64 + 1;
                    b.store.move_card(&user, id, &list, to).expect("move");
                }
                Op::Archive(item) if !active.is_empty() => {
                    let (id, _) = &active[item % active.len()];
                    b.store.archive_card(&user, id).expect("archive");
                }
                _ => {}
            }
            let positions: Vec<i64> = b.active_cards(&list).into_iter().map(|(_, p)| p).collect();
            let expected: Vec<i64> = (1..=positions.len() as i64).collect();
            prop_assert_eq!(positions, expected);
        }
    }
}
