use testing::{display_backend, setup_logger, should_debug};
use utilities::Failure;

fn main() {
    let _logger = setup_logger(should_debug()).report_and_panic("Could not set up the logger");
    let display = display_backend();

    let screens = display
        .enumerate_screens()
        .report_and_panic("Could not enumerate the screens");

    for screen in screens {
        println!("{screen}");
    }
}
