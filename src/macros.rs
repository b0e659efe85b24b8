// Create a task parameter struct with an automatic constructor
//
// - Example
// use tidepool::tp_task_params;
//
// tp_task_params! {
//     ScanTask {
//         path: String,
//         depth: usize,
//     }
// }
//
// // Usage:
// let task = ScanTask::new("/var/log".to_string(), 3);
#[macro_export]
macro_rules! tp_task_params {
    ($struct_name:ident { $($field:ident: $field_type:ty),* $(,)? }) => {
        pub struct $struct_name {
            $(pub $field: $field_type,)*
        }

        impl $struct_name {
            pub fn new($($field: $field_type),*) -> Self {
                Self {
                    $($field,)*
                }
            }
        }
    };
}

// Define a task function over a typed parameter struct. The generated
// function downcasts the pool's opaque argument back to the struct and
// panics if a task was submitted with the wrong argument type.
//
// - Example
// use tidepool::{tp_task_fn, tp_task_params};
//
// tp_task_params! {
//     ScanTask {
//         path: String,
//         depth: usize,
//     }
// }
//
// tp_task_fn!(scan_task, ScanTask, |params| {
//     println!("scanning {} to depth {}", params.path, params.depth);
// });
//
// // pool.submit(scan_task, Box::new(ScanTask::new(path, 3)), Some("scan"), Priority::Low)
#[macro_export]
macro_rules! tp_task_fn {
    ($fn_name:ident, $param_type:ty, |$params:ident| $body:block) => {
        fn $fn_name(arg: $crate::TaskArg) {
            let $params: $param_type = match arg.downcast::<$param_type>() {
                Ok(boxed) => *boxed,
                Err(_) => panic!(concat!(
                    stringify!($fn_name),
                    ": task argument is not a ",
                    stringify!($param_type)
                )),
            };
            $body
        }
    };
}
