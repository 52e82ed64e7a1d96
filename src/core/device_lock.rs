//! 按设备串行化对账
//!
//! 同一设备的两次对账可能在同一组物品上竞争新增/删除决策，调用方在运行前先取得该设备的锁；
//! 不同设备互不阻塞。未指定设备的运行覆盖全部设备，与任何其他运行互斥。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{
    Mutex as AsyncMutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// 设备 ID -> 异步互斥锁；外层读写锁区分按设备运行（读）与全量运行（写）
#[derive(Debug, Default, Clone)]
pub struct DeviceLocks {
    all: Arc<RwLock<()>>,
    locks: LockMap,
}

/// 持有期间独占对应范围；释放后无人等待的设备条目会被移除
#[derive(Debug)]
pub struct DeviceGuard {
    scope: Scope,
    locks: LockMap,
}

#[derive(Debug)]
enum Scope {
    Device {
        key: String,
        guard: Option<OwnedMutexGuard<()>>,
        _shared: OwnedRwLockReadGuard<()>,
    },
    All {
        _exclusive: OwnedRwLockWriteGuard<()>,
    },
}

fn lock_map(locks: &LockMap) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
    match locks.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 等待并持有该设备的锁；None 等待所有设备的运行结束后独占
    pub async fn lock(&self, device_id: Option<&str>) -> DeviceGuard {
        let scope = match device_id {
            None => Scope::All {
                _exclusive: self.all.clone().write_owned().await,
            },
            Some(device) => {
                let shared = self.all.clone().read_owned().await;
                let lock = lock_map(&self.locks)
                    .entry(device.to_string())
                    .or_default()
                    .clone();
                Scope::Device {
                    key: device.to_string(),
                    guard: Some(lock.lock_owned().await),
                    _shared: shared,
                }
            }
        };
        DeviceGuard {
            scope,
            locks: self.locks.clone(),
        }
    }

    pub fn tracked_devices(&self) -> usize {
        lock_map(&self.locks).len()
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        let Scope::Device { key, guard, .. } = &mut self.scope else {
            return;
        };
        drop(guard.take());
        let mut map = lock_map(&self.locks);
        if map.get(key.as_str()).is_some_and(|l| Arc::strong_count(l) == 1) {
            map.remove(key.as_str());
        }
    }
}
