// osal-core: Resource statistics accounting across the object types

use osal_core as osal;
use osal::config;

#[test]
fn test_resource_stats_accounting() {
    osal::init().unwrap();

    let before = osal::get_resource_stats();
    assert_eq!(before.tasks.total, config::MAX_TASKS as u32);
    assert_eq!(before.queues.total, config::MAX_QUEUES as u32);
    assert_eq!(before.bin_semaphores.total, config::MAX_BIN_SEMAPHORES as u32);
    assert_eq!(
        before.count_semaphores.total,
        config::MAX_COUNT_SEMAPHORES as u32
    );
    assert_eq!(before.mutexes.total, config::MAX_MUTEXES as u32);
    assert_eq!(before.streams.total, config::MAX_OPEN_FILES as u32);
    assert_eq!(before.dirs.total, config::MAX_OPEN_DIRS as u32);
    assert_eq!(before.timebases.total, config::MAX_TIMEBASES as u32);
    assert_eq!(before.timers.total, config::MAX_TIMERS as u32);
    assert_eq!(before.modules.total, config::MAX_MODULES as u32);
    assert_eq!(before.filesystems.total, config::MAX_FILE_SYSTEMS as u32);
    assert_eq!(before.consoles.total, config::MAX_CONSOLES as u32);
    assert_eq!(before.rwlocks.total, config::MAX_RWLOCKS as u32);

    // The console object created by init is accounted for.
    assert_eq!(before.consoles.used, 1);

    let binsem = osal::binsem::create("stat_binsem", 1, 0).unwrap();
    let countsem = osal::countsem::create("stat_countsem", 1, 0).unwrap();
    let mutex = osal::mutex::create("stat_mutex", 0).unwrap();
    let queue = osal::queue::create("stat_queue", 4, 4, osal::queue::QueueFlags::empty()).unwrap();

    let after = osal::get_resource_stats();
    assert_eq!(after.bin_semaphores.used, before.bin_semaphores.used + 1);
    assert_eq!(after.count_semaphores.used, before.count_semaphores.used + 1);
    assert_eq!(after.mutexes.used, before.mutexes.used + 1);
    assert_eq!(after.queues.used, before.queues.used + 1);

    // Totals never move.
    assert_eq!(after.bin_semaphores.total, before.bin_semaphores.total);
    assert_eq!(after.count_semaphores.total, before.count_semaphores.total);
    assert_eq!(after.mutexes.total, before.mutexes.total);
    assert_eq!(after.queues.total, before.queues.total);

    osal::binsem::delete(binsem).unwrap();
    osal::countsem::delete(countsem).unwrap();
    osal::mutex::delete(mutex).unwrap();
    osal::queue::delete(queue).unwrap();

    let restored = osal::get_resource_stats();
    assert_eq!(restored, before);
}
