// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Process-wide Ctrl+C handling.
//!
//! The first Ctrl+C runs the registered hooks, which ask running work to stop early. A
//! second Ctrl+C terminates the process.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;
use log::warn;

/// Exit code after a second Ctrl+C, `128 + SIGINT`.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

type Hook = Box<dyn FnMut() + Send + Sync>;

struct Interrupt {
    hooks: RwLock<Vec<Hook>>,
    presses: AtomicUsize,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Action {
    RunHooks,
    Exit,
}

lazy_static! {
    static ref INTERRUPT: Arc<Interrupt> = Arc::new(Interrupt::new());
}

/// Install the Ctrl+C handler. Fails if another handler is already installed.
pub fn install() -> Result<(), ctrlc::Error> {
    let interrupt = INTERRUPT.clone();

    // `ctrlc` runs the handler on its own thread, so hooks may block briefly.
    ctrlc::set_handler(move || {
        if interrupt.on_press() == Action::Exit {
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    })
}

/// Register a function to run on the first Ctrl+C.
pub fn register<F: FnMut() + 'static + Send + Sync>(function: F) {
    INTERRUPT.register_function(function)
}

/// Runs the registered functions, as the first Ctrl+C does.
pub fn execute() {
    INTERRUPT.execute()
}

impl Interrupt {
    fn new() -> Self {
        Self {
            hooks: RwLock::new(vec![]),
            presses: AtomicUsize::new(0),
        }
    }

    fn register_function<F: FnMut() + 'static + Send + Sync>(&self, function: F) {
        self.hooks
            .write()
            .unwrap_or_else(|err| err.into_inner())
            .push(Box::new(function));
    }

    fn on_press(&self) -> Action {
        if self.presses.fetch_add(1, Ordering::SeqCst) == 0 {
            warn!("Ctrl+C pressed, stopping. Press again to exit immediately.");
            self.execute();
            Action::RunHooks
        } else {
            warn!("Ctrl+C pressed again, exiting. Results are not saved.");
            Action::Exit
        }
    }

    fn execute(&self) {
        let mut hooks = self.hooks.write().unwrap_or_else(|err| err.into_inner());

        for hook in hooks.iter_mut() {
            hook();
        }
    }
}
