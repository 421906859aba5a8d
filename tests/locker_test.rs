mod common;

use jsbind_runtime_v8::Error;
use std::sync::mpsc;
use std::thread;

#[test]
fn test_locker_acquire_and_execute() {
    let runtime = common::runtime();

    let mut locker = runtime.locker().unwrap();
    assert!(locker.is_active());
    assert!(runtime.is_locked());
    assert!(runtime.is_in_use());

    // Calls from the owning thread run under the explicit lock
    assert_eq!(runtime.executor("1 + 1").execute_integer().unwrap(), 2);
    assert!(runtime.is_locked());

    locker.release().unwrap();
    assert!(!locker.is_active());
    assert!(!runtime.is_locked());
}

#[test]
fn test_second_locker_on_other_thread_conflicts() {
    let runtime = common::runtime();
    let _locker = runtime.locker().unwrap();

    let other = runtime.clone();
    let result = thread::spawn(move || other.locker().map(|_| ()))
        .join()
        .unwrap();

    assert!(matches!(result, Err(Error::LockConflict(_))));
}

#[test]
fn test_same_thread_reacquire_conflicts() {
    let runtime = common::runtime();
    let _locker = runtime.locker().unwrap();

    assert!(matches!(runtime.locker(), Err(Error::LockConflict(_))));
}

#[test]
fn test_double_release_conflicts() {
    let runtime = common::runtime();
    let mut locker = runtime.locker().unwrap();

    locker.release().unwrap();
    assert!(matches!(locker.release(), Err(Error::LockConflict(_))));
}

#[test]
fn test_calls_from_other_thread_fail_fast_while_locked() {
    let runtime = common::runtime();
    let value = runtime.create_object().unwrap();
    let value = std::sync::Arc::new(value);

    let locker = runtime.locker().unwrap();

    let other = runtime.clone();
    let other_value = value.clone();
    let (execute, get) = thread::spawn(move || {
        (
            other.executor("1").execute_void(),
            other_value.get("x").map(|_| ()),
        )
    })
    .join()
    .unwrap();

    assert!(matches!(execute, Err(Error::LockConflict(_))));
    assert!(matches!(get, Err(Error::LockConflict(_))));

    drop(locker);
    assert!(value.get("x").is_ok());
}

#[test]
fn test_drop_releases_locker() {
    let runtime = common::runtime();
    {
        let _locker = runtime.locker().unwrap();
        assert!(runtime.is_locked());
    }
    assert!(!runtime.is_locked());

    // Another thread can take it now
    let other = runtime.clone();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut locker = other.locker().unwrap();
        tx.send(other.executor("'ok'").execute_string().unwrap())
            .unwrap();
        locker.release().unwrap();
    })
    .join()
    .unwrap();

    assert_eq!(rx.recv().unwrap(), "ok");
}

#[test]
fn test_locker_on_closed_runtime() {
    let runtime = common::runtime();
    runtime.close().unwrap();

    assert!(matches!(runtime.locker(), Err(Error::RuntimeAlreadyClosed)));
}

#[test]
fn test_close_while_other_thread_holds_lock() {
    let runtime = common::runtime();
    let (locked_tx, locked_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let other = runtime.clone();
    let holder = thread::spawn(move || {
        let _locker = other.locker().unwrap();
        locked_tx.send(()).unwrap();
        done_rx.recv().unwrap();
    });

    locked_rx.recv().unwrap();
    assert!(matches!(runtime.close(), Err(Error::LockConflict(_))));
    assert!(!runtime.is_closed());

    done_tx.send(()).unwrap();
    holder.join().unwrap();
    runtime.close().unwrap();
}
