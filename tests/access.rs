use trellis_lib::membership::{authorize, resolve_role};
use trellis_lib::models::{ActivityFilter, NewBoard, NewCard, NewList, NewWorkspace, Role};
use trellis_lib::{Capability, Config, Error, ErrorKind, Store, Target};

struct World {
    store: Store,
    owner: String,
    member: String,
    observer: String,
    stranger: String,
    board: String,
    list: String,
    card: String,
}

fn world() -> World {
    let mut store = Store::open_in_memory().expect("store");
    let owner = store.create_user("owner", "o@example.com").expect("owner").id;
    let member = store.create_user("member", "m@example.com").expect("member").id;
    let observer = store.create_user("observer", "v@example.com").expect("observer").id;
    let stranger = store.create_user("stranger", "s@example.com").expect("stranger").id;

    let board = store
        .create_board(&owner, NewBoard { name: "Launch".into(), ..Default::default() })
        .expect("board")
        .id;
    store
        .add_board_member(&owner, &board, &member, Role::Member)
        .expect("member");
    store
        .add_board_member(&owner, &board, &observer, Role::Observer)
        .expect("observer");
    let list = store
        .create_list(&owner, NewList { board_id: board.clone(), name: "Todo".into(), position: 0 })
        .expect("list")
        .id;
    let card = store
        .create_card(&owner, NewCard { list_id: list.clone(), title: "Ship".into(), ..Default::default() })
        .expect("card")
        .id;

    World { store, owner, member, observer, stranger, board, list, card }
}

#[test]
fn roles_are_inherited_from_the_board() {
    let w = world();
    let conn = w.store.connection();
    for target in [Target::Board(&w.board), Target::List(&w.list), Target::Card(&w.card)] {
        assert_eq!(resolve_role(conn, &w.owner, target).expect("owner"), Role::Admin);
        assert_eq!(resolve_role(conn, &w.member, target).expect("member"), Role::Member);
        assert_eq!(resolve_role(conn, &w.observer, target).expect("observer"), Role::Observer);
        assert_eq!(resolve_role(conn, &w.stranger, target).expect("stranger"), Role::None);
    }
}

#[test]
fn no_membership_fails_every_capability() {
    let w = world();
    let conn = w.store.connection();
    for capability in [Capability::View, Capability::ModifyContent, Capability::Administer] {
        let err = authorize(conn, &w.stranger, Target::Card(&w.card), capability).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

#[test]
fn unknown_targets_are_not_found() {
    let w = world();
    let err = resolve_role(w.store.connection(), &w.owner, Target::Card("missing")).unwrap_err();
    assert!(matches!(err, Error::NotFound("card")));
}

#[test]
fn capability_table_is_enforced_through_operations() {
    let mut w = world();
    let (observer, member, card) = (w.observer.clone(), w.member.clone(), w.card.clone());

    let err = w.store.add_comment(&observer, &card, "hello").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    w.store.add_comment(&member, &card, "hello").expect("member comments");

    let board = w.board.clone();
    let err = w.store.renumber_lists(&member, &board).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    w.store.get_card(&observer, &card).expect("observer views");
}

#[test]
fn creators_and_owners_are_never_removable() {
    let mut w = world();
    let (owner, member, board) = (w.owner.clone(), w.member.clone(), w.board.clone());
    w.store
        .update_board_member_role(&owner, &board, &member, Role::Admin)
        .expect("promote");
    let err = w.store.remove_board_member(&member, &board, &owner).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let ws = w
        .store
        .create_workspace(&owner, NewWorkspace { name: "Company".into(), ..Default::default() })
        .expect("workspace");
    let err = w.store.remove_workspace_member(&owner, &ws.id, &owner).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[test]
fn creators_and_owners_keep_their_admin_role() {
    let mut w = world();
    let (owner, member, observer, board) =
        (w.owner.clone(), w.member.clone(), w.observer.clone(), w.board.clone());
    w.store
        .update_board_member_role(&owner, &board, &member, Role::Admin)
        .expect("promote");
    let err = w
        .store
        .update_board_member_role(&member, &board, &owner, Role::Observer)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(
        resolve_role(w.store.connection(), &owner, Target::Board(&board)).expect("role"),
        Role::Admin
    );

    let ws = w
        .store
        .create_workspace(&owner, NewWorkspace { name: "Company".into(), ..Default::default() })
        .expect("workspace");
    w.store
        .add_workspace_member(&owner, &ws.id, &member, Role::Admin)
        .expect("admin");
    let err = w
        .store
        .update_workspace_member_role(&member, &ws.id, &owner, Role::Observer)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    w.store
        .add_workspace_member(&owner, &ws.id, &observer, Role::Observer)
        .expect("owner still administers");
}

#[test]
fn activity_is_scoped_to_member_boards_and_capped() {
    let mut w = world();
    let owner = w.owner.clone();
    let list = w.list.clone();
    for i in 0..60 {
        w.store
            .create_card(&owner, NewCard { list_id: list.clone(), title: format!("c{i}"), ..Default::default() })
            .expect("card");
    }
    let feed = w.store.list_activities(&owner, &ActivityFilter::default()).expect("feed");
    assert_eq!(feed.len(), 50);
    assert!(feed.windows(2).all(|pair| pair[0].created_at >= pair[1].created_at));

    let stranger = w.stranger.clone();
    assert!(w
        .store
        .list_activities(&stranger, &ActivityFilter::default())
        .expect("feed")
        .is_empty());
}

#[test]
fn file_backed_store_persists_between_opens() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config::default().with_db_path(dir.path().join("nested").join("trellis.db"));

    let user = {
        let mut store = Store::open(&config).expect("open");
        store.create_user("ann", "ann@example.com").expect("user")
    };
    let store = Store::open(&config).expect("reopen");
    assert_eq!(store.get_user(&user.id).expect("user"), user);
}
