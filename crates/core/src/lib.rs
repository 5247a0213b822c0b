//! Camera-to-tap pipeline: frames are scored for a facial expression by an
//! asynchronous inference engine, and confident, debounced detections are
//! turned into synthetic taps on a presentation surface.

pub mod shared {
    pub mod clock;
    pub mod constants;
    pub mod frame;
    pub mod model_resolver;
}

pub mod capture {
    pub mod domain {
        pub mod frame_slot;
    }
    pub mod infrastructure {
        pub mod image_sequence_source;
    }
}

pub mod preprocessing {
    pub mod domain {
        pub mod frame_preprocessor;
    }
}

pub mod inference {
    pub mod domain {
        pub mod engine_options;
        pub mod inference_engine;
        pub mod inference_gate;
        pub mod inference_result;
    }
    pub mod infrastructure;
}

pub mod signal {
    pub mod domain {
        pub mod signal_extractor;
    }
}

pub mod trigger {
    pub mod domain {
        pub mod trigger_debouncer;
    }
}

pub mod action {
    pub mod domain {
        pub mod action_dispatcher;
        pub mod trigger_sink;
    }
    pub mod infrastructure {
        pub mod logging_trigger_sink;
    }
}

pub mod pipeline {
    pub mod perception_pipeline;
    pub mod pipeline_config;
    pub mod pipeline_logger;
}
