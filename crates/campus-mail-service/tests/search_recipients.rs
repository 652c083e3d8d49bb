//! Integration tests for recipient search: visibility filtering, exclusion,
//! display names, merge ordering, and pagination totals.

use campus_mail_core::RecipientRef;
use campus_mail_service::search;
use campus_mail_test_helpers::{
    block_on, seed_admin, seed_course, seed_group, seed_user, test_pool, user_id,
};

/// Scenario: a non-privileged user with no course memberships and no tutor
/// status sees nothing; an admin running the identical query finds the
/// matching records.
#[test]
fn isolated_user_sees_nothing_where_admin_sees_matches() {
    let (_dir, pool) = test_pool("search_scenario_c");
    block_on(|cx| async move {
        let loner = seed_user(&cx, &pool, "Jon", "Snow").await;
        let admin = seed_admin(&cx, &pool, "Aemon", "Targaryen").await;
        let sam = seed_user(&cx, &pool, "Samwell", "Tarly").await;
        seed_course(&cx, &pool, "c001", "Ravenry", &[user_id(&sam)], &[]).await;

        let empty = search::search_recipients(&cx, &pool, &loner, "Tarly", &[], 0, 10)
            .await
            .into_result()
            .expect("loner search");
        assert!(empty.hits.is_empty());
        assert_eq!(empty.total, 0);

        let found = search::search_recipients(&cx, &pool, &admin, "Tarly", &[], 0, 10)
            .await
            .into_result()
            .expect("admin search");
        assert_eq!(found.total, 1);
        assert_eq!(found.hits[0].name, "Samwell Tarly");
        assert_eq!(found.hits[0].target, RecipientRef::User(user_id(&sam)));
    });
}

#[test]
fn course_co_members_and_tutors_are_visible() {
    let (_dir, pool) = test_pool("search_visibility");
    block_on(|cx| async move {
        let arya = seed_user(&cx, &pool, "Arya", "Stark").await;
        let brandon = seed_user(&cx, &pool, "Brandon", "Stark").await;
        let syrio = seed_user(&cx, &pool, "Syrio", "Forel").await;
        let luwin = seed_user(&cx, &pool, "Luwin", "Maester").await;

        // Arya and Brandon share c001; Syrio tutors c002, Luwin tutors c003.
        seed_course(
            &cx,
            &pool,
            "c001",
            "Needlework",
            &[user_id(&arya), user_id(&brandon)],
            &[],
        )
        .await;
        seed_course(&cx, &pool, "c002", "Dancing", &[user_id(&syrio)], &[user_id(&syrio)]).await;
        seed_course(&cx, &pool, "c003", "Letters", &[user_id(&luwin)], &[user_id(&luwin)]).await;

        // Arya sees her co-member but not an unrelated tutor.
        let page = search::search_recipients(&cx, &pool, &arya, "Stark", &[], 0, 10)
            .await
            .into_result()
            .expect("arya search");
        assert_eq!(page.total, 1);
        assert_eq!(page.hits[0].name, "Brandon Stark");

        let page = search::search_recipients(&cx, &pool, &arya, "Forel", &[], 0, 10)
            .await
            .into_result()
            .expect("arya tutor search");
        assert_eq!(page.total, 0);

        // A tutor sees every other tutor, shared course or not.
        let page = search::search_recipients(&cx, &pool, &syrio, "Maester", &[], 0, 10)
            .await
            .into_result()
            .expect("tutor search");
        assert_eq!(page.total, 1);
        assert_eq!(page.hits[0].name, "Luwin Maester");

        // Never themselves.
        let page = search::search_recipients(&cx, &pool, &syrio, "Forel", &[], 0, 10)
            .await
            .into_result()
            .expect("self search");
        assert_eq!(page.total, 0);
    });
}

#[test]
fn groups_and_courses_carry_their_display_names() {
    let (_dir, pool) = test_pool("search_display_names");
    block_on(|cx| async move {
        let arya = seed_user(&cx, &pool, "Arya", "Stark").await;
        seed_course(&cx, &pool, "c001", "Needlework", &[user_id(&arya)], &[]).await;
        seed_group(&cx, &pool, "c001", "g001", "Beginners", &[user_id(&arya)]).await;

        let page = search::search_recipients(&cx, &pool, &arya, "Needle", &[], 0, 10)
            .await
            .into_result()
            .expect("search");
        // The course matches by name; the group only via its course id.
        assert_eq!(page.total, 1);
        assert_eq!(page.hits[0].name, "Needlework (Module)");

        let page = search::search_recipients(&cx, &pool, &arya, "g001", &[], 0, 10)
            .await
            .into_result()
            .expect("group search");
        assert_eq!(page.total, 1);
        assert_eq!(page.hits[0].name, "Needlework - Beginners (Group)");
        assert_eq!(
            page.hits[0].target,
            RecipientRef::Group {
                course_id: "c001".to_string(),
                group_id: "g001".to_string(),
            }
        );
    });
}

#[test]
fn exclusion_list_removes_already_picked_recipients() {
    let (_dir, pool) = test_pool("search_exclusion");
    block_on(|cx| async move {
        let arya = seed_user(&cx, &pool, "Arya", "Stark").await;
        let brandon = seed_user(&cx, &pool, "Brandon", "Stark").await;
        let catelyn = seed_user(&cx, &pool, "Catelyn", "Stark").await;
        seed_course(
            &cx,
            &pool,
            "c001",
            "Needlework",
            &[user_id(&arya), user_id(&brandon), user_id(&catelyn)],
            &[],
        )
        .await;
        seed_group(&cx, &pool, "c001", "g001", "Beginners", &[user_id(&arya)]).await;

        let exclude = vec![
            RecipientRef::User(user_id(&brandon)),
            RecipientRef::Group {
                course_id: "c001".to_string(),
                group_id: "g001".to_string(),
            },
            RecipientRef::Course("c001".to_string()),
        ];
        let page = search::search_recipients(&cx, &pool, &arya, "", &exclude, 0, 10)
            .await
            .into_result()
            .expect("search");
        // Everything matches an empty query; the picked recipients (and the
        // caller) are gone.
        assert_eq!(page.total, 1);
        assert_eq!(page.hits[0].name, "Catelyn Stark");
    });
}

#[test]
fn merged_results_sort_by_name_and_total_ignores_truncation() {
    let (_dir, pool) = test_pool("search_pagination");
    block_on(|cx| async move {
        let admin = seed_admin(&cx, &pool, "Aemon", "Targaryen").await;
        let arya = seed_user(&cx, &pool, "Arya", "Stark").await;
        let brandon = seed_user(&cx, &pool, "Brandon", "Stark").await;
        seed_course(
            &cx,
            &pool,
            "stark101",
            "Stark History",
            &[user_id(&arya), user_id(&brandon)],
            &[],
        )
        .await;
        seed_group(
            &cx,
            &pool,
            "stark101",
            "g001",
            "Stark Cadets",
            &[user_id(&arya)],
        )
        .await;

        let page = search::search_recipients(&cx, &pool, &admin, "Stark", &[], 0, 2)
            .await
            .into_result()
            .expect("page 0");
        // Two users + one group + one course match, merged and name-sorted.
        assert_eq!(page.total, 4);
        assert_eq!(page.hits.len(), 2);
        assert_eq!(page.hits[0].name, "Arya Stark");
        assert_eq!(page.hits[1].name, "Brandon Stark");

        let page = search::search_recipients(&cx, &pool, &admin, "Stark", &[], 1, 2)
            .await
            .into_result()
            .expect("page 1");
        assert_eq!(page.hits.len(), 2);
        assert_eq!(page.hits[0].name, "Stark History (Module)");
        assert_eq!(page.hits[1].name, "Stark History - Stark Cadets (Group)");

        let page = search::search_recipients(&cx, &pool, &admin, "Stark", &[], 2, 2)
            .await
            .into_result()
            .expect("page 2");
        assert!(page.hits.is_empty());
        assert_eq!(page.total, 4);
    });
}
