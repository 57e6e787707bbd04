/// COCO dataset classes, in model index order.
pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// Ordered list of class names a backend can report.
///
/// Class indices reported by a backend are positions in this list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vocabulary {
    classes: Vec<String>,
}

impl Vocabulary {
    pub fn coco() -> Self {
        Self {
            classes: COCO_CLASSES.iter().map(|name| name.to_string()).collect(),
        }
    }

    /// Builds a vocabulary from a backend report. Returns `None` for an empty list.
    pub fn from_classes(classes: Vec<String>) -> Option<Self> {
        if classes.is_empty() {
            return None;
        }
        Some(Self { classes })
    }

    pub fn label(&self, class_index: usize) -> Option<&str> {
        self.classes.get(class_index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::coco()
    }
}
