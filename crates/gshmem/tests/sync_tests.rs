//! Point-to-point synchronization: wait-until termination, test variants,
//! boundary behaviors, and work-group forms.

use gshmem::{Attr, Cmp, LocalWorld, WorkGroup};

fn attr() -> Attr {
    Attr::default().with_heap_length(1 << 16)
}

/// wait_until returns in finite steps of a remote update, for every
/// comparison operator.
#[test]
fn test_wait_until_terminates_for_all_comparisons() {
    let cases: &[(Cmp, u64, u64)] = &[
        (Cmp::Eq, 5, 5),
        (Cmp::Ne, 0, 3),
        (Cmp::Gt, 4, 9),
        (Cmp::Ge, 7, 7),
        (Cmp::Lt, 10, 2),
        (Cmp::Le, 6, 6),
    ];
    for &(cmp, threshold, update) in cases {
        LocalWorld::launch(2, attr(), |pe| {
            let ivar = pe.calloc(1, 8).unwrap() as *mut u64;
            pe.barrier_all();

            if pe.my_pe() == 0 {
                if cmp == Cmp::Lt {
                    // Start above the threshold, drop below it remotely.
                    pe.atomic_set(ivar, 99u64, 0);
                }
                pe.barrier_all();
                pe.wait_until(ivar, cmp, threshold);
                let v = pe.atomic_fetch(ivar as *const u64, 0);
                assert!(gshmem::compare(v, threshold, cmp));
            } else {
                pe.barrier_all();
                std::thread::sleep(std::time::Duration::from_millis(5));
                pe.atomic_set(ivar, update, 0);
            }
            pe.barrier_all();
        });
    }
}

/// wait_until_all over zero elements returns immediately.
#[test]
fn test_wait_until_all_empty_returns() {
    LocalWorld::launch(1, attr(), |pe| {
        pe.wait_until_all(std::ptr::null_mut::<u64>(), 0, None, Cmp::Eq, 1u64);
    });
}

#[test]
fn test_wait_until_all_with_status_mask() {
    LocalWorld::launch(2, attr(), |pe| {
        let ivars = pe.calloc(4, 8).unwrap() as *mut u64;
        pe.barrier_all();

        if pe.my_pe() == 0 {
            // Index 2 never changes but is masked out.
            let status = [0, 0, 1, 0];
            pe.wait_until_all(ivars, 4, Some(&status), Cmp::Eq, 7u64);
            for i in [0usize, 1, 3] {
                // Safety: ivars is our own array; writers quiesced by wait.
                assert_eq!(unsafe { *ivars.add(i) }, 7);
            }
        } else {
            for i in [0usize, 1, 3] {
                // Safety: distinct elements of the remote array.
                unsafe { pe.atomic_set(ivars.add(i), 7u64, 0) };
            }
        }
        pe.barrier_all();
    });
}

#[test]
fn test_wait_until_any_returns_matching_index() {
    LocalWorld::launch(2, attr(), |pe| {
        let ivars = pe.calloc(8, 8).unwrap() as *mut u64;
        pe.barrier_all();

        if pe.my_pe() == 0 {
            let found = pe.wait_until_any(ivars, 8, None, Cmp::Eq, 42u64);
            assert_eq!(found, 5);
        } else {
            std::thread::sleep(std::time::Duration::from_millis(5));
            // Safety: element 5 of the remote array.
            unsafe { pe.atomic_set(ivars.add(5), 42u64, 0) };
        }
        pe.barrier_all();
    });
}

#[test]
fn test_wait_until_some_collects_indices() {
    LocalWorld::launch(2, attr(), |pe| {
        let ivars = pe.calloc(6, 8).unwrap() as *mut u64;
        pe.barrier_all();

        if pe.my_pe() == 0 {
            let mut indices = [0usize; 6];
            let count = pe.wait_until_some(ivars, 6, &mut indices, None, Cmp::Ne, 0u64);
            assert!(count >= 1);
            for &i in &indices[..count] {
                assert!(i == 1 || i == 4);
            }
        } else {
            std::thread::sleep(std::time::Duration::from_millis(5));
            unsafe {
                pe.atomic_set(ivars.add(1), 1u64, 0);
                pe.atomic_set(ivars.add(4), 1u64, 0);
            }
        }
        pe.barrier_all();
    });
}

#[test]
fn test_test_predicates() {
    LocalWorld::launch(1, attr(), |pe| {
        let ivars = pe.calloc(4, 8).unwrap() as *mut u64;
        // Safety: our own freshly allocated array.
        unsafe {
            *ivars = 1;
            *ivars.add(1) = 2;
            *ivars.add(2) = 3;
            *ivars.add(3) = 4;
        }

        assert!(pe.test(ivars, Cmp::Eq, 1u64));
        assert!(!pe.test(ivars, Cmp::Gt, 1u64));
        assert!(pe.test_all(ivars, 4, None, Cmp::Ge, 1u64));
        assert!(!pe.test_all(ivars, 4, None, Cmp::Gt, 3u64));

        let any = pe.test_any(ivars, 4, None, Cmp::Eq, 3u64);
        assert_eq!(any, 2);

        let mut indices = [0usize; 4];
        let some = pe.test_some(ivars, 4, &mut indices, None, Cmp::Ge, 3u64);
        assert_eq!(some, 2);
        assert_eq!(&indices[..2], &[2, 3]);
    });
}

/// test_any with every index masked returns usize::MAX.
#[test]
fn test_test_any_all_masked() {
    LocalWorld::launch(1, attr(), |pe| {
        let ivars = pe.calloc(3, 8).unwrap() as *mut u64;
        // Safety: our own array.
        unsafe {
            *ivars = 1;
            *ivars.add(1) = 1;
            *ivars.add(2) = 1;
        }
        let status = [1, 1, 1];
        let found = pe.test_any(ivars, 3, Some(&status), Cmp::Eq, 1u64);
        assert_eq!(found, usize::MAX);
    });
}

#[test]
fn test_test_any_empty_is_max() {
    LocalWorld::launch(1, attr(), |pe| {
        let found = pe.test_any(std::ptr::null_mut::<u64>(), 0, None, Cmp::Eq, 1u64);
        assert_eq!(found, usize::MAX);
    });
}

#[test]
fn test_vector_forms() {
    LocalWorld::launch(1, attr(), |pe| {
        let ivars = pe.calloc(3, 8).unwrap() as *mut u64;
        // Safety: our own array.
        unsafe {
            *ivars = 10;
            *ivars.add(1) = 20;
            *ivars.add(2) = 30;
        }
        let per_index = [10u64, 20, 30];
        assert!(pe.test_all_vector(ivars, 3, None, Cmp::Eq, &per_index));

        let off_by_one = [10u64, 21, 30];
        assert!(!pe.test_all_vector(ivars, 3, None, Cmp::Eq, &off_by_one));

        let any = pe.test_any_vector(ivars, 3, None, Cmp::Eq, &off_by_one);
        assert!(any == 0 || any == 2);

        let mut indices = [0usize; 3];
        let some = pe.test_some_vector(ivars, 3, &mut indices, None, Cmp::Eq, &off_by_one);
        assert_eq!(some, 2);
        assert_eq!(&indices[..2], &[0, 2]);
    });
}

/// The signal wait returns the satisfying value.
#[test]
fn test_signal_wait_until_returns_value() {
    LocalWorld::launch(2, attr(), |pe| {
        let sig = pe.calloc(1, 8).unwrap() as *mut u64;
        pe.barrier_all();

        if pe.my_pe() == 0 {
            let v = pe.signal_wait_until(sig, Cmp::Ge, 3);
            assert!(v >= 3);
        } else {
            for _ in 0..3 {
                pe.atomic_add(sig, 1u64, 0);
            }
        }
        pe.barrier_all();
    });
}

/// Work-group forms: the leader checks once, every member observes the
/// same result.
#[test]
fn test_work_group_variants() {
    LocalWorld::launch(2, attr(), |pe| {
        let ivars = pe.calloc(8, 8).unwrap() as *mut u64;
        pe.barrier_all();

        if pe.my_pe() == 0 {
            let group_size = 3;
            let grp = WorkGroup::new(group_size);
            let ivars_addr = ivars as usize;
            std::thread::scope(|scope| {
                let pe = &*pe;
                let grp = &grp;
                for member in 0..group_size {
                    scope.spawn(move || {
                        let ivars = ivars_addr as *mut u64;
                        pe.wait_until_work_group(grp, member, ivars, Cmp::Eq, 11u64);

                        let all =
                            pe.test_all_work_group(grp, member, ivars, 8, None, Cmp::Ge, 0u64);
                        assert!(all);

                        let any =
                            pe.test_any_work_group(grp, member, ivars, 8, None, Cmp::Eq, 11u64);
                        assert_eq!(any, 0);

                        let seen = pe.test_work_group(grp, member, ivars, Cmp::Eq, 11u64);
                        assert!(seen);
                    });
                }
            });
        } else {
            std::thread::sleep(std::time::Duration::from_millis(5));
            pe.atomic_set(ivars, 11u64, 0);
        }
        pe.barrier_all();
    });
}
