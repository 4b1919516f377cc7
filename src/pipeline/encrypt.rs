//! Single-page isolation and password protection.
//!
//! Each split file is a fresh document built from one page's object graph,
//! with inherited page attributes made explicit. The standard security
//! handler (RC4, 128-bit key) is then applied with the derived password as
//! both user and owner password.

use lopdf::encryption::{EncryptionState, EncryptionVersion, Permissions};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, StringFormat};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Key length for the RC4 security handler, in bits.
const KEY_LENGTH: usize = 128;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&str; 4] = ["Resources", "MediaBox", "CropBox", "Rotate"];

/// A new document holding only `page_number` (1-based) and the objects it
/// reaches. `None` when the page does not exist.
///
/// Cost is proportional to the page's own object graph, not to the size of
/// the batch.
pub fn isolate_page(source: &Document, page_number: u32) -> Option<Document> {
    let page_id = *source.get_pages().get(&page_number)?;
    let mut page = source.get_dictionary(page_id).ok()?.clone();
    for key in INHERITABLE {
        if !page.has(key.as_bytes()) {
            if let Some(value) = inherited(source, page_id, key) {
                page.set(key, value);
            }
        }
    }
    page.remove(b"Parent");

    let mut copier = GraphCopier {
        source,
        target: Document::with_version(source.version.clone()),
        ids: HashMap::new(),
    };
    let new_page_id = copier.target.new_object_id();
    copier.ids.insert(page_id, new_page_id);
    let mut page = copier.remap_dict(&page);

    let mut document = copier.target;
    let pages_id = document.new_object_id();
    page.set("Parent", pages_id);
    document.objects.insert(new_page_id, Object::Dictionary(page));
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(new_page_id)],
            "Count" => 1i64,
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);
    document.renumber_objects();
    document.compress();
    Some(document)
}

/// Nearest ancestor value of `key` for the page `page_id`.
fn inherited(source: &Document, page_id: ObjectId, key: &str) -> Option<Object> {
    let mut node = source.get_dictionary(page_id).ok()?;
    loop {
        let parent_id = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = source.get_dictionary(parent_id).ok()?;
        if let Ok(value) = node.get(key.as_bytes()) {
            return Some(value.clone());
        }
    }
}

/// Deep-copies objects from `source` into `target`, renumbering references.
struct GraphCopier<'a> {
    source: &'a Document,
    target: Document,
    ids: HashMap<ObjectId, ObjectId>,
}

impl GraphCopier<'_> {
    fn copy_ref(&mut self, id: ObjectId) -> ObjectId {
        if let Some(&copied) = self.ids.get(&id) {
            return copied;
        }
        let new_id = self.target.new_object_id();
        self.ids.insert(id, new_id);

        // Other pages and tree nodes are cut off, e.g. link targets in annotations.
        let source = self.source;
        let object = match source.get_object(id) {
            Ok(object) if !is_page_tree_node(object) => self.remap(object),
            _ => Object::Null,
        };
        self.target.objects.insert(new_id, object);
        new_id
    }

    fn remap(&mut self, object: &Object) -> Object {
        match object {
            Object::Reference(id) => Object::Reference(self.copy_ref(*id)),
            Object::Array(items) => Object::Array(items.iter().map(|o| self.remap(o)).collect()),
            Object::Dictionary(dict) => Object::Dictionary(self.remap_dict(dict)),
            Object::Stream(stream) => {
                let mut copy = stream.clone();
                copy.dict = self.remap_dict(&stream.dict);
                Object::Stream(copy)
            }
            other => other.clone(),
        }
    }

    fn remap_dict(&mut self, dict: &Dictionary) -> Dictionary {
        let mut copy = Dictionary::new();
        for (key, value) in dict.iter() {
            copy.set(key.clone(), self.remap(value));
        }
        copy
    }
}

fn is_page_tree_node(object: &Object) -> bool {
    let Ok(dict) = object.as_dict() else {
        return false;
    };
    matches!(dict.get(b"Type").and_then(Object::as_name), Ok(b"Page") | Ok(b"Pages"))
}

/// Encrypt `document` in place. `seed` feeds the trailer file identifier,
/// which the key derivation requires.
pub fn encrypt_with_password(
    document: &mut Document,
    password: &str,
    seed: &str,
) -> Result<(), lopdf::Error> {
    let id = file_id(seed);
    document.trailer.set(
        "ID",
        Object::Array(vec![
            Object::String(id.clone(), StringFormat::Hexadecimal),
            Object::String(id, StringFormat::Hexadecimal),
        ]),
    );

    let version = EncryptionVersion::V2 {
        document: &*document,
        owner_password: password,
        user_password: password,
        key_length: KEY_LENGTH,
        permissions: Permissions::all(),
    };
    let state = EncryptionState::try_from(version)?;
    document.encrypt(&state)
}

/// 16 bytes derived from `seed`. Only has to differ between files.
fn file_id(seed: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(16);
    for salt in [0u8, 1u8] {
        let mut hasher = DefaultHasher::new();
        salt.hash(&mut hasher);
        seed.hash(&mut hasher);
        bytes.extend_from_slice(&hasher.finish().to_be_bytes());
    }
    bytes
}
