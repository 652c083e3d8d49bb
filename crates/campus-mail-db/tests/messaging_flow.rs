//! Integration tests for the messaging query layer: fan-out, tree
//! maintenance, thread reconstruction, marking, and the inbox/notification
//! aggregations.

use campus_mail_db::queries::{
    self, InboxSortField, NewMessage, SortDirection, TargetAudit,
};
use campus_mail_db::{MessageItemRow, MessageRow, directory};
use campus_mail_test_helpers::{block_on, seed_admin, seed_user, test_pool, user_id};

fn message_id(message: &MessageRow) -> i64 {
    message.id.expect("message id")
}

fn item_of<'a>(items: &'a [MessageItemRow], user: i64) -> &'a MessageItemRow {
    items
        .iter()
        .find(|i| i.user_id == user)
        .expect("item for user")
}

#[test]
fn send_creates_one_item_per_recipient_plus_auto_read_source() {
    let (_dir, pool) = test_pool("fanout_source");
    block_on(|cx| async move {
        let cersei = seed_user(&cx, &pool, "Cersei", "Lannister").await;
        let jaime = seed_user(&cx, &pool, "Jaime", "Lannister").await;
        let tywin = seed_user(&cx, &pool, "Tywin", "Lannister").await;

        let new = NewMessage {
            sender_id: Some(user_id(&cersei)),
            subject: "I want him dead!".to_string(),
            body: "The Imp, that is.".to_string(),
            ..Default::default()
        };
        let audit = TargetAudit {
            users: vec![user_id(&jaime), user_id(&tywin)],
            ..TargetAudit::none()
        };
        let message = queries::create_message(
            &cx,
            &pool,
            &new,
            &[user_id(&jaime), user_id(&tywin)],
            &audit,
        )
        .await
        .into_result()
        .expect("create message");

        assert!(message.is_root());
        assert_eq!(message.level, 0);
        assert!(!message.is_notification_bool());

        let items = queries::items_for_message(&cx, &pool, message_id(&message))
            .await
            .into_result()
            .expect("items");
        assert_eq!(items.len(), 3, "two recipients plus the source copy");

        let source = item_of(&items, user_id(&cersei));
        assert!(source.is_source());
        assert!(source.read_ts.is_some(), "source copy is auto-read");
        assert!(source.deleted_ts.is_none());

        for recipient in [&jaime, &tywin] {
            let item = item_of(&items, user_id(recipient));
            assert!(!item.is_source());
            assert!(item.read_ts.is_none());
            assert!(item.deleted_ts.is_none());
        }

        let targets = queries::targets_for_message(&cx, &pool, message_id(&message))
            .await
            .into_result()
            .expect("targets");
        assert_eq!(targets.users.len(), 2);
        assert_eq!(targets.users[0].0, user_id(&jaime).min(user_id(&tywin)));
    });
}

#[test]
fn sender_among_recipients_gets_no_extra_source_item() {
    let (_dir, pool) = test_pool("fanout_self");
    block_on(|cx| async move {
        let cersei = seed_user(&cx, &pool, "Cersei", "Lannister").await;
        let jaime = seed_user(&cx, &pool, "Jaime", "Lannister").await;

        let new = NewMessage {
            sender_id: Some(user_id(&cersei)),
            subject: "Note to us".to_string(),
            ..Default::default()
        };
        let message = queries::create_message(
            &cx,
            &pool,
            &new,
            &[user_id(&cersei), user_id(&jaime)],
            &TargetAudit::none(),
        )
        .await
        .into_result()
        .expect("create message");

        let items = queries::items_for_message(&cx, &pool, message_id(&message))
            .await
            .into_result()
            .expect("items");
        assert_eq!(items.len(), 2, "exactly one item per resolved recipient");
        assert!(items.iter().all(|i| !i.is_source()));
    });
}

#[test]
fn broadcast_targets_every_non_admin_and_records_no_audit_rows() {
    let (_dir, pool) = test_pool("broadcast");
    block_on(|cx| async move {
        let admin = seed_admin(&cx, &pool, "Petyr", "Baelish").await;
        let other_admin = seed_admin(&cx, &pool, "Varys", "Spider").await;
        let jaime = seed_user(&cx, &pool, "Jaime", "Lannister").await;
        let tywin = seed_user(&cx, &pool, "Tywin", "Lannister").await;

        let message = queries::create_broadcast(
            &cx,
            &pool,
            user_id(&admin),
            "Hear ye",
            "All of it.",
            None,
        )
        .await
        .into_result()
        .expect("create broadcast");

        assert!(message.target_all_bool());

        let items = queries::items_for_message(&cx, &pool, message_id(&message))
            .await
            .into_result()
            .expect("items");
        let item_users: Vec<i64> = items.iter().map(|i| i.user_id).collect();
        assert_eq!(item_users, vec![user_id(&jaime), user_id(&tywin)]);
        assert!(!item_users.contains(&user_id(&admin)));
        assert!(!item_users.contains(&user_id(&other_admin)));

        let targets = queries::targets_for_message(&cx, &pool, message_id(&message))
            .await
            .into_result()
            .expect("targets");
        assert!(targets.users.is_empty());
        assert!(targets.groups.is_empty());
        assert!(targets.courses.is_empty());
    });
}

#[test]
fn notification_has_no_sender_and_one_item_per_user() {
    let (_dir, pool) = test_pool("notification");
    block_on(|cx| async move {
        let jaime = seed_user(&cx, &pool, "Jaime", "Lannister").await;
        let tywin = seed_user(&cx, &pool, "Tywin", "Lannister").await;

        let message = queries::create_notification(
            &cx,
            &pool,
            &[user_id(&jaime), user_id(&tywin)],
            "https://campus.example/grades",
            "Grades published",
            "Your grades are available.",
        )
        .await
        .into_result()
        .expect("create notification");

        assert!(message.is_notification_bool());
        assert!(message.sender_id.is_none());
        assert_eq!(message.url, "https://campus.example/grades");

        let items = queries::items_for_message(&cx, &pool, message_id(&message))
            .await
            .into_result()
            .expect("items");
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.read_ts.is_none()));
    });
}

#[test]
fn replies_share_the_tree_and_maintain_intervals() {
    let (_dir, pool) = test_pool("tree_intervals");
    block_on(|cx| async move {
        let oberyn = seed_user(&cx, &pool, "Oberyn", "Martell").await;
        let ellaria = seed_user(&cx, &pool, "Ellaria", "Sand").await;
        let recipients = [user_id(&ellaria)];

        let send = |subject: &str, parent_id: Option<i64>| NewMessage {
            sender_id: Some(user_id(&oberyn)),
            subject: subject.to_string(),
            parent_id,
            ..Default::default()
        };

        let m1 = queries::create_message(&cx, &pool, &send("root", None), &recipients, &TargetAudit::none())
            .await
            .into_result()
            .expect("m1");
        let m2 = queries::create_message(
            &cx,
            &pool,
            &send("reply 1", m1.id),
            &recipients,
            &TargetAudit::none(),
        )
        .await
        .into_result()
        .expect("m2");
        let m3 = queries::create_message(
            &cx,
            &pool,
            &send("reply 2", m1.id),
            &recipients,
            &TargetAudit::none(),
        )
        .await
        .into_result()
        .expect("m3");
        let m4 = queries::create_message(
            &cx,
            &pool,
            &send("reply to reply", m2.id),
            &recipients,
            &TargetAudit::none(),
        )
        .await
        .into_result()
        .expect("m4");

        // All four share one tree; levels follow the reply edges.
        assert_eq!(m2.tree_id, m1.tree_id);
        assert_eq!(m3.tree_id, m1.tree_id);
        assert_eq!(m4.tree_id, m1.tree_id);
        assert_eq!((m1.level, m2.level, m3.level, m4.level), (0, 1, 1, 2));

        // Reload for the final interval state.
        let m1 = queries::get_message(&cx, &pool, message_id(&m1)).await.into_result().expect("m1");
        let m2 = queries::get_message(&cx, &pool, message_id(&m2)).await.into_result().expect("m2");
        let m3 = queries::get_message(&cx, &pool, message_id(&m3)).await.into_result().expect("m3");
        let m4 = queries::get_message(&cx, &pool, message_id(&m4)).await.into_result().expect("m4");

        assert_eq!((m1.lft, m1.rght), (1, 8));
        assert_eq!((m2.lft, m2.rght), (2, 5));
        assert_eq!((m4.lft, m4.rght), (3, 4));
        assert_eq!((m3.lft, m3.rght), (6, 7));

        // Ancestor chain via the intervals, nearest-first including self.
        let ancestors = queries::thread_ancestors(&cx, &pool, message_id(&m4))
            .await
            .into_result()
            .expect("ancestors");
        let chain: Vec<i64> = ancestors.iter().map(|m| m.id.unwrap_or_default()).collect();
        assert_eq!(
            chain,
            vec![message_id(&m4), message_id(&m2), message_id(&m1)]
        );

        // A parentless message opens a fresh tree.
        let m5 = queries::create_message(&cx, &pool, &send("new thread", None), &recipients, &TargetAudit::none())
            .await
            .into_result()
            .expect("m5");
        assert_ne!(m5.tree_id, m1.tree_id);
        assert_eq!((m5.lft, m5.rght, m5.level), (1, 2, 0));
    });
}

/// Scenario: four messages in one thread; soft-deleting the second-oldest
/// drops the count by exactly one and leaves the rest newest-first.
#[test]
fn thread_reconstruction_excludes_only_soft_deleted_items() {
    let (_dir, pool) = test_pool("thread_soft_delete");
    block_on(|cx| async move {
        let oberyn = seed_user(&cx, &pool, "Oberyn", "Martell").await;
        let tyene = seed_user(&cx, &pool, "Tyene", "Sand").await;
        let recipients = [user_id(&tyene)];

        let base = 1_406_538_000_000_000; // 2014-07-28 09:00:00 UTC
        let mut parent = None;
        let mut messages = Vec::new();
        for (i, subject) in ["Justice", "r1", "r2", "r3"].iter().enumerate() {
            let new = NewMessage {
                sender_id: Some(user_id(&oberyn)),
                subject: (*subject).to_string(),
                parent_id: parent,
                ..Default::default()
            };
            let m = queries::create_message(&cx, &pool, &new, &recipients, &TargetAudit::none())
                .await
                .into_result()
                .expect("send");
            // Pin sent times so ordering is deterministic.
            queries::update_message_sent(&cx, &pool, message_id(&m), base + (i as i64) * 60_000_000)
                .await
                .into_result()
                .expect("backdate");
            parent = m.id;
            messages.push(m);
        }

        let m1_items = queries::items_for_message(&cx, &pool, message_id(&messages[0]))
            .await
            .into_result()
            .expect("items");
        let tyene_item = item_of(&m1_items, user_id(&tyene)).id.expect("item id");

        let thread = queries::thread_items(&cx, &pool, tyene_item)
            .await
            .into_result()
            .expect("thread");
        assert_eq!(thread.len(), 4);
        let subjects: Vec<&str> = thread.iter().map(|r| r.subject.as_str()).collect();
        assert_eq!(subjects, vec!["r3", "r2", "r1", "Justice"]);

        // Soft-delete the second-oldest message's item for this user.
        let second_oldest = thread[2].item_id;
        queries::mark_items_deleted(&cx, &pool, &[second_oldest])
            .await
            .into_result()
            .expect("delete");

        let thread = queries::thread_items(&cx, &pool, tyene_item)
            .await
            .into_result()
            .expect("thread after delete");
        assert_eq!(thread.len(), 3);
        let subjects: Vec<&str> = thread.iter().map(|r| r.subject.as_str()).collect();
        assert_eq!(subjects, vec!["r3", "r2", "Justice"]);

        // The sender's view of the same tree is untouched.
        let oberyn_items = queries::items_for_message(&cx, &pool, message_id(&messages[0]))
            .await
            .into_result()
            .expect("items");
        let oberyn_item = item_of(&oberyn_items, user_id(&oberyn)).id.expect("item id");
        let oberyn_thread = queries::thread_items(&cx, &pool, oberyn_item)
            .await
            .into_result()
            .expect("sender thread");
        assert_eq!(oberyn_thread.len(), 4);

        // Deleting everything empties the thread for this user only.
        let remaining: Vec<i64> = thread.iter().map(|r| r.item_id).collect();
        queries::mark_items_deleted(&cx, &pool, &remaining)
            .await
            .into_result()
            .expect("delete rest");
        let thread = queries::thread_items(&cx, &pool, tyene_item)
            .await
            .into_result()
            .expect("empty thread");
        assert!(thread.is_empty());
    });
}

#[test]
fn mark_items_read_is_idempotent() {
    let (_dir, pool) = test_pool("mark_read_idempotent");
    block_on(|cx| async move {
        let oberyn = seed_user(&cx, &pool, "Oberyn", "Martell").await;
        let obara = seed_user(&cx, &pool, "Obara", "Sand").await;

        let new = NewMessage {
            sender_id: Some(user_id(&oberyn)),
            subject: "spears".to_string(),
            ..Default::default()
        };
        let message = queries::create_message(&cx, &pool, &new, &[user_id(&obara)], &TargetAudit::none())
            .await
            .into_result()
            .expect("send");

        let items = queries::items_for_message(&cx, &pool, message_id(&message))
            .await
            .into_result()
            .expect("items");
        let ids: Vec<i64> = items.iter().filter_map(|i| i.id).collect();

        queries::mark_items_read(&cx, &pool, &ids)
            .await
            .into_result()
            .expect("mark read");
        let first_pass = queries::items_for_message(&cx, &pool, message_id(&message))
            .await
            .into_result()
            .expect("items");
        let first_ts: Vec<Option<i64>> = first_pass.iter().map(|i| i.read_ts).collect();
        assert!(first_ts.iter().all(Option::is_some));

        // The source item's original auto-read timestamp must survive too.
        queries::mark_items_read(&cx, &pool, &ids)
            .await
            .into_result()
            .expect("mark read again");
        let second_pass = queries::items_for_message(&cx, &pool, message_id(&message))
            .await
            .into_result()
            .expect("items");
        let second_ts: Vec<Option<i64>> = second_pass.iter().map(|i| i.read_ts).collect();
        assert_eq!(first_ts, second_ts);

        // Empty input is a no-op, not a query.
        let affected = queries::mark_items_read(&cx, &pool, &[])
            .await
            .into_result()
            .expect("empty mark");
        assert_eq!(affected, 0);
    });
}

#[test]
fn inbox_collapses_each_tree_to_its_newest_row() {
    let (_dir, pool) = test_pool("inbox_collapse");
    block_on(|cx| async move {
        let alice = seed_user(&cx, &pool, "Alice", "Auditor").await;
        let bob = seed_user(&cx, &pool, "Bob", "Builder").await;

        let base = 1_406_538_000_000_000;

        // Tree 1: alice -> bob, then bob replies to alice.
        let m1 = queries::create_message(
            &cx,
            &pool,
            &NewMessage {
                sender_id: Some(user_id(&alice)),
                subject: "hello".to_string(),
                ..Default::default()
            },
            &[user_id(&bob)],
            &TargetAudit::none(),
        )
        .await
        .into_result()
        .expect("m1");
        queries::update_message_sent(&cx, &pool, message_id(&m1), base)
            .await
            .into_result()
            .expect("pin m1");

        let m2 = queries::create_message(
            &cx,
            &pool,
            &NewMessage {
                sender_id: Some(user_id(&bob)),
                subject: "re: hello".to_string(),
                parent_id: m1.id,
                ..Default::default()
            },
            &[user_id(&alice)],
            &TargetAudit::none(),
        )
        .await
        .into_result()
        .expect("m2");
        queries::update_message_sent(&cx, &pool, message_id(&m2), base + 60_000_000)
            .await
            .into_result()
            .expect("pin m2");

        // Tree 2: alice -> bob, no replies.
        let m3 = queries::create_message(
            &cx,
            &pool,
            &NewMessage {
                sender_id: Some(user_id(&alice)),
                subject: "second thread".to_string(),
                ..Default::default()
            },
            &[user_id(&bob)],
            &TargetAudit::none(),
        )
        .await
        .into_result()
        .expect("m3");
        queries::update_message_sent(&cx, &pool, message_id(&m3), base + 120_000_000)
            .await
            .into_result()
            .expect("pin m3");

        // Bob: one row per tree, newest representative message each.
        let rows = queries::fetch_inbox(
            &cx,
            &pool,
            user_id(&bob),
            InboxSortField::Date,
            SortDirection::Desc,
            10,
            0,
        )
        .await
        .into_result()
        .expect("bob inbox");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].subject, "second thread");
        assert_eq!(rows[1].subject, "re: hello");
        assert_eq!(rows[1].sender_first_name, "Bob", "tree 1 representative is bob's own reply");

        let total = queries::count_inbox(&cx, &pool, user_id(&bob))
            .await
            .into_result()
            .expect("count");
        assert_eq!(total, 2);

        // Ascending date flips the order.
        let rows_asc = queries::fetch_inbox(
            &cx,
            &pool,
            user_id(&bob),
            InboxSortField::Date,
            SortDirection::Asc,
            10,
            0,
        )
        .await
        .into_result()
        .expect("bob inbox asc");
        assert_eq!(rows_asc[0].subject, "re: hello");

        // Sender sort orders by first then last name.
        let rows_sender = queries::fetch_inbox(
            &cx,
            &pool,
            user_id(&bob),
            InboxSortField::Sender,
            SortDirection::Asc,
            10,
            0,
        )
        .await
        .into_result()
        .expect("bob inbox by sender");
        assert_eq!(rows_sender[0].sender_first_name, "Alice");
        assert_eq!(rows_sender[1].sender_first_name, "Bob");

        // The sender sees a freshly sent thread in their own inbox: alice
        // holds only the auto-read source item in tree 2.
        let alice_rows = queries::fetch_inbox(
            &cx,
            &pool,
            user_id(&alice),
            InboxSortField::Date,
            SortDirection::Desc,
            10,
            0,
        )
        .await
        .into_result()
        .expect("alice inbox");
        assert_eq!(alice_rows.len(), 2);
        assert_eq!(alice_rows[0].subject, "second thread");
        assert!(alice_rows[0].source != 0);

        let unread = queries::unread_count_per_tree(
            &cx,
            &pool,
            user_id(&alice),
            &[m3.tree_id],
        )
        .await
        .into_result()
        .expect("alice unread");
        assert_eq!(unread.get(&m3.tree_id), None, "source copy is already read");

        // Per-tree counts for bob.
        let undeleted = queries::undeleted_count_per_tree(
            &cx,
            &pool,
            user_id(&bob),
            &[m1.tree_id, m3.tree_id],
        )
        .await
        .into_result()
        .expect("bob undeleted");
        assert_eq!(undeleted.get(&m1.tree_id), Some(&2));
        assert_eq!(undeleted.get(&m3.tree_id), Some(&1));

        let empty = queries::undeleted_count_per_tree(&cx, &pool, user_id(&bob), &[])
            .await
            .into_result()
            .expect("empty input");
        assert!(empty.is_empty());

        // Deleting every item bob holds in tree 1 removes that tree from
        // his inbox but not from alice's.
        queries::mark_thread_deleted(&cx, &pool, user_id(&bob), m1.tree_id)
            .await
            .into_result()
            .expect("delete tree");
        let total = queries::count_inbox(&cx, &pool, user_id(&bob))
            .await
            .into_result()
            .expect("count after delete");
        assert_eq!(total, 1);
        let total_alice = queries::count_inbox(&cx, &pool, user_id(&alice))
            .await
            .into_result()
            .expect("alice count");
        assert_eq!(total_alice, 2);

        // Overall unread badge for bob: m3's item is the only live unread.
        let badge = queries::unread_count(&cx, &pool, user_id(&bob), false)
            .await
            .into_result()
            .expect("badge");
        assert_eq!(badge, 1);
    });
}

#[test]
fn backdating_reorders_inbox_without_touching_the_tree() {
    let (_dir, pool) = test_pool("backdate");
    block_on(|cx| async move {
        let alice = seed_user(&cx, &pool, "Alice", "Auditor").await;
        let bob = seed_user(&cx, &pool, "Bob", "Builder").await;

        let base = 1_406_538_000_000_000;
        let send = |subject: &'static str| {
            let cx = cx.clone();
            let pool = pool.clone();
            let alice_id = user_id(&alice);
            let bob_id = user_id(&bob);
            async move {
                queries::create_message(
                    &cx,
                    &pool,
                    &NewMessage {
                        sender_id: Some(alice_id),
                        subject: subject.to_string(),
                        ..Default::default()
                    },
                    &[bob_id],
                    &TargetAudit::none(),
                )
                .await
                .into_result()
                .expect("send")
            }
        };

        let earlier = send("first sent").await;
        let later = send("second sent").await;
        queries::update_message_sent(&cx, &pool, message_id(&earlier), base + 60_000_000)
            .await
            .into_result()
            .expect("pin");
        // Backdate the later send before the earlier one.
        queries::update_message_sent(&cx, &pool, message_id(&later), base)
            .await
            .into_result()
            .expect("backdate");

        let rows = queries::fetch_inbox(
            &cx,
            &pool,
            user_id(&bob),
            InboxSortField::Date,
            SortDirection::Desc,
            10,
            0,
        )
        .await
        .into_result()
        .expect("inbox");
        assert_eq!(rows[0].subject, "first sent");
        assert_eq!(rows[1].subject, "second sent");

        // Tree structure is untouched by the display reorder.
        let reloaded = queries::get_message(&cx, &pool, message_id(&later))
            .await
            .into_result()
            .expect("reload");
        assert_eq!((reloaded.lft, reloaded.rght, reloaded.level), (1, 2, 0));
    });
}

#[test]
fn notifications_feed_is_newest_first_and_honours_soft_delete() {
    let (_dir, pool) = test_pool("notifications_feed");
    block_on(|cx| async move {
        let bob = seed_user(&cx, &pool, "Bob", "Builder").await;

        let base = 1_406_538_000_000_000;
        let n1 = queries::create_notification(
            &cx,
            &pool,
            &[user_id(&bob)],
            "https://campus.example/a",
            "first",
            "",
        )
        .await
        .into_result()
        .expect("n1");
        queries::update_message_sent(&cx, &pool, message_id(&n1), base)
            .await
            .into_result()
            .expect("pin n1");
        let n2 = queries::create_notification(
            &cx,
            &pool,
            &[user_id(&bob)],
            "https://campus.example/b",
            "second",
            "",
        )
        .await
        .into_result()
        .expect("n2");
        queries::update_message_sent(&cx, &pool, message_id(&n2), base + 60_000_000)
            .await
            .into_result()
            .expect("pin n2");

        let rows = queries::fetch_notifications(&cx, &pool, user_id(&bob), 10, 0)
            .await
            .into_result()
            .expect("feed");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].subject, "second");
        assert_eq!(rows[1].subject, "first");

        // Notifications never appear in the message inbox.
        let inbox_total = queries::count_inbox(&cx, &pool, user_id(&bob))
            .await
            .into_result()
            .expect("inbox total");
        assert_eq!(inbox_total, 0);

        let unread = queries::unread_count(&cx, &pool, user_id(&bob), true)
            .await
            .into_result()
            .expect("unread notifications");
        assert_eq!(unread, 2);

        queries::mark_items_deleted(&cx, &pool, &[rows[0].item_id])
            .await
            .into_result()
            .expect("delete one");
        let rows = queries::fetch_notifications(&cx, &pool, user_id(&bob), 10, 0)
            .await
            .into_result()
            .expect("feed after delete");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].subject, "first");
        let total = queries::count_notifications(&cx, &pool, user_id(&bob))
            .await
            .into_result()
            .expect("count");
        assert_eq!(total, 1);
    });
}

#[test]
fn directory_membership_queries_resolve_rosters() {
    let (_dir, pool) = test_pool("directory_membership");
    block_on(|cx| async move {
        let a = seed_user(&cx, &pool, "Arya", "Stark").await;
        let b = seed_user(&cx, &pool, "Brandon", "Stark").await;
        let c = seed_user(&cx, &pool, "Catelyn", "Stark").await;

        campus_mail_test_helpers::seed_course(
            &cx,
            &pool,
            "c001",
            "Course One",
            &[user_id(&a), user_id(&b)],
            &[user_id(&a)],
        )
        .await;
        campus_mail_test_helpers::seed_group(
            &cx,
            &pool,
            "c001",
            "g001",
            "Group One",
            &[user_id(&b)],
        )
        .await;

        let members = directory::members_of_course(&cx, &pool, "c001")
            .await
            .into_result()
            .expect("course members");
        assert_eq!(members, vec![user_id(&a), user_id(&b)]);

        let group_members = directory::members_of_group(&cx, &pool, "c001", "g001")
            .await
            .into_result()
            .expect("group members");
        assert_eq!(group_members, vec![user_id(&b)]);

        // Unknown ids resolve to empty rosters, never errors.
        assert!(
            directory::members_of_course(&cx, &pool, "nope")
                .await
                .into_result()
                .expect("unknown course")
                .is_empty()
        );
        assert!(
            directory::members_of_group(&cx, &pool, "c001", "nope")
                .await
                .into_result()
                .expect("unknown group")
                .is_empty()
        );

        assert!(
            directory::is_tutor_in_any_course(&cx, &pool, user_id(&a))
                .await
                .into_result()
                .expect("tutor flag")
        );
        assert!(
            !directory::is_tutor_in_any_course(&cx, &pool, user_id(&b))
                .await
                .into_result()
                .expect("tutor flag")
        );

        // Co-membership: a and b share c001; c shares nothing.
        let visible_to_a = directory::course_co_member_ids(&cx, &pool, user_id(&a))
            .await
            .into_result()
            .expect("co-members");
        assert_eq!(visible_to_a, vec![user_id(&b)]);
        let visible_to_c = directory::course_co_member_ids(&cx, &pool, user_id(&c))
            .await
            .into_result()
            .expect("co-members");
        assert!(visible_to_c.is_empty());
    });
}
