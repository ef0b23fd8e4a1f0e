//! Fan out asynchronous work and continue once all of it has finished

use parking_lot::Mutex;
use std::sync::Arc;

type Then = Box<dyn FnOnce() + Send + 'static>;

struct Finisher {
    then: Mutex<Option<Then>>,
}

impl Drop for Finisher {
    fn drop(&mut self) {
        if let Some(then) = self.then.get_mut().take() {
            then();
        }
    }
}

/// Completion token for one item of [`for_each_then`]
///
/// The item counts as finished once every clone of its token is finished or
/// dropped, so a token moved into a callback completes when the callback has
/// run and been released.
#[derive(Clone)]
pub struct Done {
    _finisher: Arc<Finisher>,
}

impl Done {
    pub fn finish(self) {}
}

impl std::fmt::Debug for Done {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Done")
    }
}

/// Start `each` for every item, then run `then` exactly once after the loop
/// has ended and every item's [`Done`] token has been released
///
/// `then` runs on whichever thread releases the last token; with no items it
/// runs before this function returns.
pub fn for_each_then<I, E, F>(items: I, mut each: E, then: F)
where
    I: IntoIterator,
    E: FnMut(I::Item, Done),
    F: FnOnce() + Send + 'static,
{
    let finisher = Arc::new(Finisher {
        then: Mutex::new(Some(Box::new(then))),
    });

    for item in items {
        each(
            item,
            Done {
                _finisher: finisher.clone(),
            },
        );
    }
}
